use std::error::Error;

use proptest::prelude::*;
use qscan_core::{
    AcquisitionCfg, AxisRequest, ClockSource, MeasurementKind, ScalerInput, ScanDevices,
    ScanError, ScanRequest, classify, planner,
};
use qscan_traits::{AcquisitionPort, McsMode, MotorPort, WaitMode};
use rstest::rstest;

type PortResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Motor that records speed overrides and can be told to fail.
struct SpyMotor {
    name: String,
    speed: f64,
    saved: Option<f64>,
    accel_time: f64,
    fail_set: bool,
    fail_restore: bool,
    fail_accel: bool,
}

impl SpyMotor {
    fn new(name: &str, speed: f64) -> Self {
        Self {
            name: name.into(),
            speed,
            saved: None,
            accel_time: 0.2,
            fail_set: false,
            fail_restore: false,
            fail_accel: false,
        }
    }
}

impl MotorPort for SpyMotor {
    fn name(&self) -> &str {
        &self.name
    }
    fn move_absolute(&mut self, _target: f64, _mode: WaitMode) -> PortResult<()> {
        Ok(())
    }
    fn position(&mut self) -> PortResult<f64> {
        Ok(0.0)
    }
    fn is_busy(&mut self) -> PortResult<bool> {
        Ok(false)
    }
    fn soft_abort(&mut self) -> PortResult<()> {
        Ok(())
    }
    fn acceleration_time(&mut self) -> PortResult<f64> {
        if self.fail_accel {
            return Err("controller offline".into());
        }
        Ok(self.accel_time)
    }
    fn acceleration_distance(&mut self) -> PortResult<f64> {
        Ok(0.5 * self.speed * self.accel_time)
    }
    fn base_speed(&mut self) -> PortResult<f64> {
        Ok(0.0)
    }
    fn set_speed_between(&mut self, start: f64, end: f64, duration: f64) -> PortResult<()> {
        if self.fail_set {
            return Err("speed out of range".into());
        }
        self.saved.get_or_insert(self.speed);
        self.speed = (end - start).abs() / duration;
        Ok(())
    }
    fn restore_speed(&mut self) -> PortResult<()> {
        if let Some(s) = self.saved.take() {
            self.speed = s;
        }
        if self.fail_restore {
            return Err("restore rejected".into());
        }
        Ok(())
    }
}

#[derive(Default)]
struct IdleMcs;

impl AcquisitionPort for IdleMcs {
    fn name(&self) -> &str {
        "mcs"
    }
    fn set_mode(&mut self, _mode: McsMode) -> PortResult<()> {
        Ok(())
    }
    fn set_measurement_time(&mut self, _seconds: f64) -> PortResult<()> {
        Ok(())
    }
    fn set_num_measurements(&mut self, _n: usize) -> PortResult<()> {
        Ok(())
    }
    fn clear(&mut self) -> PortResult<()> {
        Ok(())
    }
    fn start(&mut self) -> PortResult<()> {
        Ok(())
    }
    fn stop(&mut self) -> PortResult<()> {
        Ok(())
    }
    fn is_busy(&mut self) -> PortResult<bool> {
        Ok(false)
    }
    fn set_external_channel_advance(&mut self, _enabled: bool) -> PortResult<()> {
        Ok(())
    }
    fn set_external_prescale(&mut self, _prescale: u32) -> PortResult<()> {
        Ok(())
    }
    fn read_scaler(&mut self, _channel: usize) -> PortResult<Vec<i64>> {
        Ok(Vec::new())
    }
}

fn request(axes: &[(&str, f64, f64)], n: usize, mt: f64) -> ScanRequest {
    let mut b = ScanRequest::builder().num_measurements(n);
    for &(m, s, e) in axes {
        b = b.axis(AxisRequest::new(m, s, e));
    }
    b.measurement(MeasurementKind::PresetTime { seconds: mt })
        .build()
        .expect("valid request")
}

fn plan_with(
    motors: &mut [SpyMotor],
    req: &ScanRequest,
) -> qscan_core::Result<(qscan_core::AcquisitionPlan, Vec<qscan_core::MotionProfile>)> {
    let mut mcs = IdleMcs;
    let mut devices = ScanDevices::new()
        .with_mcs(&mut mcs)
        .with_input(ScalerInput::new("i0", 0, 0))
        .with_clock(ClockSource::InternalTimer { mcs: 0 });
    for m in motors.iter_mut() {
        devices = devices.with_motor(m);
    }
    planner::plan(req, &mut devices, &AcquisitionCfg::default())
}

#[test]
fn two_axis_plan_adds_premove_and_ramps() {
    let mut motors = [SpyMotor::new("m1", 3.0), SpyMotor::new("m2", 3.0)];
    let req = request(&[("m1", 0.0, 10.0), ("m2", 0.0, 5.0)], 50, 0.1);
    let (plan, profiles) = plan_with(&mut motors, &req).expect("plan");

    assert_eq!(plan.premove_measurements, 2);
    assert_eq!(plan.acceleration_measurements, 2);
    assert_eq!(plan.actual_num_measurements, 58);
    assert!((plan.body_time - 4.9).abs() < 1e-9);
    assert!(!plan.backlash_correction);
    assert_eq!(plan.ports, vec![0]);

    // Acceleration distance was read at the synchronized speed.
    let m1 = &profiles[0];
    let sync = 10.0 / 4.9;
    let accel = 0.5 * sync * 0.2;
    assert!((m1.extended_start - (0.0 - accel)).abs() < 1e-9);
    assert!((m1.extended_end - (10.0 + accel)).abs() < 1e-9);
    assert!(profiles[1].extended_end > 5.0);

    // Speeds are back to where they were.
    assert!(motors.iter().all(|m| (m.speed - 3.0).abs() < 1e-12));
}

#[test]
fn descending_axis_extends_outward() {
    let mut motors = [SpyMotor::new("m1", 1.0)];
    let req = request(&[("m1", 5.0, 1.0)], 5, 0.5);
    let (_, profiles) = plan_with(&mut motors, &req).expect("plan");
    assert!(profiles[0].extended_start > 5.0);
    assert!(profiles[0].extended_end < 1.0);
}

#[test]
fn zero_acceleration_skips_premove() {
    let mut m = SpyMotor::new("m1", 1.0);
    m.accel_time = 0.0;
    let mut motors = [m];
    let req = request(&[("m1", 0.0, 1.0)], 11, 0.1);
    let (plan, _) = plan_with(&mut motors, &req).expect("plan");
    assert_eq!(plan.premove_measurements, 0);
    assert_eq!(plan.acceleration_measurements, 0);
    assert_eq!(plan.actual_num_measurements, 11);
}

#[rstest]
#[case::kinematics_read_fails(0, "accel")]
#[case::second_speed_set_fails(1, "set")]
#[case::restore_fails(0, "restore")]
fn speeds_survive_planning_failures(#[case] which: usize, #[case] fault: &str) {
    let mut motors = [SpyMotor::new("m1", 2.0), SpyMotor::new("m2", 4.0)];
    match fault {
        "accel" => motors[which].fail_accel = true,
        "set" => motors[which].fail_set = true,
        _ => motors[which].fail_restore = true,
    }
    let req = request(&[("m1", 0.0, 1.0), ("m2", 0.0, 1.0)], 10, 0.1);
    let err = plan_with(&mut motors, &req).expect_err("planning must fail");
    assert!(matches!(classify(&err), Some(ScanError::Hardware(_))));
    assert!((motors[0].speed - 2.0).abs() < 1e-12);
    assert!((motors[1].speed - 4.0).abs() < 1e-12);
    assert!(motors.iter().all(|m| m.saved.is_none()));
}

#[test]
fn axis_order_must_match_devices() {
    let mut motors = [SpyMotor::new("m2", 1.0), SpyMotor::new("m1", 1.0)];
    let req = request(&[("m1", 0.0, 1.0), ("m2", 0.0, 1.0)], 10, 0.1);
    let err = plan_with(&mut motors, &req).expect_err("mismatch");
    assert!(matches!(classify(&err), Some(ScanError::Configuration(_))));
}

proptest! {
    #[test]
    fn planning_never_leaves_speeds_changed(
        speeds in prop::collection::vec(0.1f64..50.0, 1..4),
        span in 0.5f64..100.0,
        n in 2usize..200,
        mt in 0.01f64..1.0,
        fail_at in 0usize..8,
    ) {
        let mut motors: Vec<SpyMotor> = speeds
            .iter()
            .enumerate()
            .map(|(i, &s)| SpyMotor::new(&format!("m{i}"), s))
            .collect();
        if let Some(m) = motors.get_mut(fail_at) {
            m.fail_accel = true;
        }
        let names: Vec<String> = motors.iter().map(|m| m.name.clone()).collect();
        let axes: Vec<(&str, f64, f64)> = names.iter().map(|n| (n.as_str(), 0.0, span)).collect();
        let req = request(&axes, n, mt);
        let res = plan_with(&mut motors, &req);
        prop_assert_eq!(res.is_ok(), fail_at >= speeds.len());
        for (m, &s) in motors.iter().zip(&speeds) {
            prop_assert!((m.speed - s).abs() < 1e-12);
        }
        if let Ok((plan, _)) = res {
            prop_assert!(plan.actual_num_measurements >= n);
        }
    }
}
