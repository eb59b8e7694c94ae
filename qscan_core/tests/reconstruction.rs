use proptest::prelude::*;
use qscan_core::reconstruct::{
    dead_reckoning, fitted_acceleration, positions_from_encoder, reconstruct_axis,
};
use qscan_core::{AcquisitionPlan, EncoderBinding, MeasurementKind, MotionProfile, PositionSource};
use qscan_traits::{EncoderPort, EncoderType, MotorPort, WaitMode};
use rstest::rstest;
use std::error::Error;

type PortResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

fn profile(real_ext_start: f64, real_start: f64, real_end: f64, real_ext_end: f64) -> MotionProfile {
    MotionProfile {
        motor: "m1".into(),
        start: real_start,
        end: real_end,
        extended_start: real_ext_start,
        extended_end: real_ext_end,
        real_start,
        real_end,
        real_extended_start: real_ext_start,
        real_extended_end: real_ext_end,
        backlash_position: real_ext_start,
        acceleration_time: 0.5,
        acceleration_distance: (real_start - real_ext_start).abs(),
        base_velocity: 0.0,
    }
}

fn plan(requested: usize, actual: usize, mt: f64, accel_time: f64) -> AcquisitionPlan {
    #[allow(clippy::cast_precision_loss)]
    let body_time = mt * (requested - 1) as f64;
    AcquisitionPlan {
        measurement: MeasurementKind::PresetTime { seconds: mt },
        measurement_time: mt,
        requested_num_measurements: requested,
        actual_num_measurements: actual,
        premove_measurements: 2,
        acceleration_measurements: (accel_time / mt).round() as usize,
        premove_time: 2.0 * mt,
        acceleration_time: accel_time,
        body_time,
        estimated_duration: 4.0 * mt + 2.0 * accel_time + body_time,
        backlash_correction: false,
        ports: vec![0],
    }
}

#[test]
fn absolute_encoder_maps_every_sample() {
    let p = positions_from_encoder(&[0.0, 1.0, 2.0, 3.0], EncoderType::Absolute, 2.0, 10.0, -1.0, 4);
    assert_eq!(p, vec![10.0, 12.0, 14.0, 16.0]);
}

#[test]
fn fitted_acceleration_covers_the_ramp() {
    let a = fitted_acceleration(1.0, 0.0, 0.5);
    assert!((a - 8.0).abs() < 1e-12);
}

#[test]
fn dead_reckoning_follows_the_four_segments() {
    // Ramp of 1.0 over 0.5 s, body 1..6 in 1.0 s with mt = 0.25.
    let prof = profile(0.0, 1.0, 6.0, 7.0);
    let plan = plan(5, 13, 0.25, 0.5);
    let p = dead_reckoning(&prof, &plan).expect("estimate");
    assert_eq!(p.len(), 13);

    // Premove at rest.
    assert_eq!(&p[..2], &[0.0, 0.0]);
    // Acceleration: a = 8, t = 0 and 0.25.
    assert!((p[2] - 0.0).abs() < 1e-12);
    assert!((p[3] - 0.25).abs() < 1e-12);
    // Body: slew 5 units/s from real_start.
    assert!((p[4] - 1.0).abs() < 1e-12);
    assert!((p[7] - 4.75).abs() < 1e-12);
    // Deceleration mirrors the fitted acceleration from real_end.
    assert!((p[8] - 6.0).abs() < 1e-12);
    assert!((p[9] - (6.0 + 5.0 * 0.25 - 0.5 * 8.0 * 0.0625)).abs() < 1e-12);
    // Postmove at the extended end.
    assert!(p[10..].iter().all(|&x| (x - 7.0).abs() < 1e-12));
}

#[rstest]
#[case::premove_past_buffer(2)]
#[case::body_past_buffer(4)]
fn dead_reckoning_rejects_tiny_buffers(#[case] actual: usize) {
    let prof = profile(0.0, 1.0, 2.0, 3.0);
    let plan = plan(2, actual, 0.25, 0.5);
    let err = dead_reckoning(&prof, &plan).expect_err("buffer too small");
    assert!(matches!(
        qscan_core::classify(&err),
        Some(qscan_core::ScanError::Fatal(_))
    ));
}

/// Pseudomotor with pseudo = 2 * real + 1.
struct Doubled;

impl MotorPort for Doubled {
    fn name(&self) -> &str {
        "energy"
    }
    fn real_motor_name(&self) -> &str {
        "m1"
    }
    fn is_pseudomotor(&self) -> bool {
        true
    }
    fn move_absolute(&mut self, _t: f64, _m: WaitMode) -> PortResult<()> {
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
        Ok(0.5)
    }
    fn acceleration_distance(&mut self) -> PortResult<f64> {
        Ok(1.0)
    }
    fn base_speed(&mut self) -> PortResult<f64> {
        Ok(0.0)
    }
    fn set_speed_between(&mut self, _s: f64, _e: f64, _d: f64) -> PortResult<()> {
        Ok(())
    }
    fn restore_speed(&mut self) -> PortResult<()> {
        Ok(())
    }
    fn real_position_from_pseudo(&self, pseudo: f64) -> PortResult<f64> {
        Ok((pseudo - 1.0) / 2.0)
    }
    fn pseudo_position_from_real(&self, real: f64) -> PortResult<f64> {
        Ok(2.0 * real + 1.0)
    }
}

struct FixedEncoder {
    values: PortResult<Vec<f64>>,
}

impl EncoderPort for FixedEncoder {
    fn name(&self) -> &str {
        "mce0"
    }
    fn encoder_type(&self) -> EncoderType {
        EncoderType::Incremental
    }
    fn can_serve(&self, real_motor: &str) -> bool {
        real_motor == "m1"
    }
    fn connect_to_motor(&mut self, _real_motor: &str) -> PortResult<()> {
        Ok(())
    }
    fn read(&mut self) -> PortResult<Vec<f64>> {
        match &self.values {
            Ok(v) => Ok(v.clone()),
            Err(e) => Err(e.to_string().into()),
        }
    }
    fn current_count(&mut self) -> PortResult<usize> {
        Ok(self.values.as_ref().map_or(0, Vec::len))
    }
}

fn binding() -> EncoderBinding {
    EncoderBinding {
        axis: 0,
        encoder: 0,
        encoder_type: EncoderType::Incremental,
        scale: 0.5,
        offset: 0.0,
    }
}

#[test]
fn pseudomotor_positions_are_converted_and_short_reads_zero_filled() {
    let prof = profile(0.0, 1.0, 6.0, 7.0);
    let plan = plan(5, 13, 0.25, 0.5);
    let mut enc = FixedEncoder {
        values: Ok(vec![0.0, 2.0, 4.0]),
    };
    let b = binding();
    let enc: &mut dyn EncoderPort = &mut enc;
    let out = reconstruct_axis(&Doubled, &prof, &plan, Some((enc, &b))).expect("positions");
    assert_eq!(out.source, PositionSource::Encoder(EncoderType::Incremental));
    assert_eq!(out.valid, 3);
    assert_eq!(&out.real[..3], &[0.0, 1.0, 2.0]);
    assert_eq!(&out.positions[..3], &[1.0, 3.0, 5.0]);
    // Missing samples stay zero, not converted.
    assert!(out.positions[3..].iter().all(|&p| p == 0.0));
}

#[test]
fn unreadable_encoder_falls_back_to_estimate() {
    let prof = profile(0.0, 1.0, 6.0, 7.0);
    let plan = plan(5, 13, 0.25, 0.5);
    let mut enc = FixedEncoder {
        values: Err("readback failed".into()),
    };
    let b = binding();
    let enc: &mut dyn EncoderPort = &mut enc;
    let out = reconstruct_axis(&Doubled, &prof, &plan, Some((enc, &b))).expect("positions");
    assert_eq!(out.source, PositionSource::DeadReckoning);
    assert_eq!(out.valid, 13);
    // Extended end 7.0 in pseudo space.
    assert!((out.positions[12] - 15.0).abs() < 1e-12);
}

#[rstest]
#[case::nan(f64::NAN)]
#[case::infinite(f64::INFINITY)]
#[case::negative_infinite(f64::NEG_INFINITY)]
fn non_finite_encoder_samples_fall_back_to_estimate(#[case] bad: f64) {
    let prof = profile(0.0, 1.0, 6.0, 7.0);
    let plan = plan(5, 13, 0.25, 0.5);
    let mut enc = FixedEncoder {
        values: Ok(vec![0.0, 2.0, bad, 6.0]),
    };
    let b = binding();
    let enc: &mut dyn EncoderPort = &mut enc;
    let out = reconstruct_axis(&Doubled, &prof, &plan, Some((enc, &b))).expect("positions");
    assert_eq!(out.source, PositionSource::DeadReckoning);
    assert_eq!(out.valid, 13);
    assert!(out.real.iter().all(|p| p.is_finite()));
    assert!(out.positions.iter().all(|p| p.is_finite()));
}

proptest! {
    #[test]
    fn delta_samples_report_bin_centres(
        p0 in -1000.0f64..1000.0,
        d in -10.0f64..10.0,
        scale in prop::sample::select(vec![0.5, 1.0, 2.0, -1.0]),
        n in 2usize..64,
    ) {
        let raw = vec![d / scale; n];
        let p = positions_from_encoder(&raw, EncoderType::Delta, scale, 0.0, p0, n);
        prop_assert_eq!(p[0], p0);
        for (i, &x) in p.iter().enumerate().skip(1) {
            #[allow(clippy::cast_precision_loss)]
            let expected = p0 + d * (i as f64 - 0.5);
            prop_assert!((x - expected).abs() < 1e-6, "i={} x={} expected={}", i, x, expected);
        }
    }
}
