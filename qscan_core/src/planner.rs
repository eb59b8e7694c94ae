//! Scan planning: synchronized speeds, extended ranges, backlash
//! pre-positions and the number of bins to acquire.

use eyre::WrapErr;
use qscan_traits::MotorPort;

use crate::config::AcquisitionCfg;
use crate::devices::{ClockSource, ScanDevices};
use crate::error::{Result, ScanError};
use crate::hw_error::{PortResultExt, map_port_error};
use crate::request::{MeasurementKind, ScanRequest};

/// Acceleration times below this are treated as instantaneous.
const NEGLIGIBLE_ACCEL_TIME: f64 = 1e-9;
/// Backlash (in raw motor steps) below this needs no correction move.
const NEGLIGIBLE_BACKLASH_STEPS: f64 = 1e-6;
const RATIO_ULPS: f64 = 8.0;

/// Per-motor kinematics for one scan. Read-only once planned.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionProfile {
    pub motor: String,
    /// Nominal window, in the motor's own (possibly pseudo) units.
    pub start: f64,
    pub end: f64,
    /// Window widened so the motor is at full speed across the nominal one.
    pub extended_start: f64,
    pub extended_end: f64,
    /// The same four positions in real-motor units.
    pub real_start: f64,
    pub real_end: f64,
    pub real_extended_start: f64,
    pub real_extended_end: f64,
    /// Where the drivetrain is loaded before moving to the extended start.
    pub backlash_position: f64,
    pub acceleration_time: f64,
    pub acceleration_distance: f64,
    /// Base speed of the real motor.
    pub base_velocity: f64,
}

/// Bin grid and device set for one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionPlan {
    pub measurement: MeasurementKind,
    pub measurement_time: f64,
    pub requested_num_measurements: usize,
    pub actual_num_measurements: usize,
    /// Stationary bins before the motors move (and after they stop).
    pub premove_measurements: usize,
    /// Bins spanned by the shared acceleration (and deceleration).
    pub acceleration_measurements: usize,
    pub premove_time: f64,
    /// Longest acceleration time across all axes.
    pub acceleration_time: f64,
    pub body_time: f64,
    pub estimated_duration: f64,
    pub backlash_correction: bool,
    /// Distinct MCS indices taking part, in first-use order.
    pub ports: Vec<usize>,
}

impl AcquisitionPlan {
    /// Total wall time the clock source runs for.
    pub fn acquisition_time(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let n = self.actual_num_measurements as f64;
        n * self.measurement_time
    }
}

/// Smallest `n >= requested` with `(n - 1) * measurement_time >= estimated`.
///
/// A few ULPs of tolerance absorb the rounding of `estimated / measurement_time`
/// so exact multiples do not round up by one. Anything larger than float
/// noise rounds up.
pub fn actual_num_measurements(estimated: f64, measurement_time: f64, requested: usize) -> usize {
    let ratio = crate::util::divide_safely(estimated.max(0.0), measurement_time);
    let tolerance = RATIO_ULPS * f64::EPSILON * ratio.abs().max(1.0);
    let bins = (ratio - tolerance).ceil().max(0.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bins = if bins >= usize::MAX as f64 {
        usize::MAX - 1
    } else {
        bins as usize
    };
    (bins + 1).max(requested)
}

// ── Speed override guard ─────────────────────────────────────────────────────

/// Synchronized speeds applied to a set of motors, restored on drop.
///
/// If applying fails partway, exactly the motors already changed are
/// restored.
pub struct SpeedOverrideGuard<'g, 'm> {
    motors: &'g mut [&'m mut dyn MotorPort],
    applied: usize,
}

impl<'g, 'm> SpeedOverrideGuard<'g, 'm> {
    /// Set each motor's speed so it covers `ranges[i]` in `duration` seconds.
    pub fn apply(
        motors: &'g mut [&'m mut dyn MotorPort],
        ranges: &[(f64, f64)],
        duration: f64,
    ) -> Result<Self> {
        let mut guard = Self {
            motors,
            applied: 0,
        };
        for (i, &(start, end)) in ranges.iter().enumerate() {
            let Some(m) = guard.motors.get_mut(i) else {
                break;
            };
            let name = m.name().to_string();
            m.set_speed_between(start, end, duration)
                .port_err()
                .wrap_err_with(|| format!("setting synchronized speed for '{name}'"))?;
            guard.applied = i + 1;
        }
        Ok(guard)
    }

    pub fn motors(&mut self) -> &mut [&'m mut dyn MotorPort] {
        &mut *self.motors
    }

    /// Restore now and report the first failure.
    pub fn restore(mut self) -> Result<()> {
        let n = std::mem::take(&mut self.applied);
        let mut first: Option<eyre::Report> = None;
        for m in self.motors.iter_mut().take(n) {
            if let Err(e) = m.restore_speed() {
                tracing::warn!(motor = m.name(), error = %e, "restore_speed failed");
                if first.is_none() {
                    first = Some(
                        eyre::Report::new(map_port_error(&*e))
                            .wrap_err(format!("restoring speed of '{}'", m.name())),
                    );
                }
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl Drop for SpeedOverrideGuard<'_, '_> {
    fn drop(&mut self) {
        let n = std::mem::take(&mut self.applied);
        for m in self.motors.iter_mut().take(n) {
            if let Err(e) = m.restore_speed() {
                tracing::warn!(motor = m.name(), error = %e, "restore_speed failed");
            }
        }
    }
}

// ── Planning ─────────────────────────────────────────────────────────────────

/// Seconds per bin, after checking the measurement kind and clock source
/// agree.
pub fn resolve_measurement_time(
    kind: MeasurementKind,
    clock: Option<&ClockSource<'_>>,
) -> Result<f64> {
    match (kind, clock) {
        (MeasurementKind::PresetCount { .. }, _) => Err(eyre::Report::new(
            ScanError::UnsupportedMeasurementKind(kind.label()),
        )),
        (MeasurementKind::PresetTime { seconds }, Some(ClockSource::InternalTimer { .. }))
        | (
            MeasurementKind::PresetPulsePeriod { seconds },
            Some(ClockSource::PulseGenerator(_)),
        ) => Ok(seconds),
        _ => Err(eyre::Report::new(ScanError::NoClockAvailable(kind.label()))),
    }
}

fn config_error(msg: String) -> eyre::Report {
    eyre::Report::new(ScanError::Configuration(msg))
}

fn distinct_ports(devices: &ScanDevices<'_>) -> Result<Vec<usize>> {
    let mut ports: Vec<usize> = Vec::new();
    let mut push = |idx: usize, what: &str| -> Result<()> {
        if idx >= devices.mcs.len() {
            return Err(config_error(format!(
                "{what} refers to MCS #{idx}, but only {} are attached",
                devices.mcs.len()
            )));
        }
        if !ports.contains(&idx) {
            ports.push(idx);
        }
        Ok(())
    };
    if let Some(ClockSource::InternalTimer { mcs }) = &devices.clock {
        push(*mcs, "the internal timer")?;
    }
    for input in &devices.inputs {
        push(input.mcs, &format!("input '{}'", input.name))?;
    }
    if ports.is_empty() {
        return Err(config_error("no MCS takes part in the scan".into()));
    }
    Ok(ports)
}

fn check_axes(request: &ScanRequest, devices: &ScanDevices<'_>) -> Result<()> {
    let axes = request.axes();
    if axes.len() != devices.motors.len() {
        return Err(config_error(format!(
            "request scans {} motors but {} are attached",
            axes.len(),
            devices.motors.len()
        )));
    }
    for (axis, motor) in axes.iter().zip(&devices.motors) {
        if axis.motor != motor.name() {
            return Err(config_error(format!(
                "axis '{}' is attached as motor '{}'",
                axis.motor,
                motor.name()
            )));
        }
    }
    Ok(())
}

struct Kinematics {
    acceleration_time: f64,
    acceleration_distance: f64,
    base_velocity: f64,
    extended: (f64, f64),
}

fn read_kinematics(m: &mut dyn MotorPort, start: f64, end: f64) -> Result<Kinematics> {
    Ok(Kinematics {
        acceleration_time: m.acceleration_time().port_err()?,
        acceleration_distance: m.acceleration_distance().port_err()?,
        base_velocity: m.base_speed().port_err()?,
        extended: m.extended_scan_range(start, end).port_err()?,
    })
}

/// Compute the acquisition plan and one motion profile per axis.
///
/// Motor speeds are temporarily synchronized to read the real acceleration
/// figures and are always restored before returning.
pub fn plan(
    request: &ScanRequest,
    devices: &mut ScanDevices<'_>,
    cfg: &AcquisitionCfg,
) -> Result<(AcquisitionPlan, Vec<MotionProfile>)> {
    let measurement = request.measurement();
    let mt = resolve_measurement_time(measurement, devices.clock.as_ref())?;
    check_axes(request, devices)?;
    let ports = distinct_ports(devices)?;

    let requested = request.num_measurements();
    #[allow(clippy::cast_precision_loss)]
    let body_time = mt * (requested - 1) as f64;
    let ranges: Vec<(f64, f64)> = request.axes().iter().map(|a| (a.start, a.end)).collect();

    let kinematics = {
        let mut guard = SpeedOverrideGuard::apply(&mut devices.motors, &ranges, body_time)?;
        let mut out = Vec::with_capacity(ranges.len());
        for (m, &(start, end)) in guard.motors().iter_mut().zip(&ranges) {
            let name = m.name().to_string();
            let k = read_kinematics(&mut **m, start, end)
                .wrap_err_with(|| format!("reading kinematics of '{name}'"))?;
            out.push(k);
        }
        guard.restore()?;
        out
    };

    let longest_accel = kinematics
        .iter()
        .map(|k| k.acceleration_time)
        .fold(0.0_f64, f64::max);
    let (premove_measurements, premove_time, acceleration_time) =
        if longest_accel < NEGLIGIBLE_ACCEL_TIME {
            (0, 0.0, 0.0)
        } else {
            #[allow(clippy::cast_precision_loss)]
            let t = mt * cfg.premove_measurements as f64;
            (cfg.premove_measurements, t, longest_accel)
        };
    let estimated_duration = 2.0 * premove_time + 2.0 * acceleration_time + body_time;
    if !estimated_duration.is_finite() {
        return Err(config_error(format!(
            "estimated scan duration {estimated_duration} is not finite"
        )));
    }
    let actual = actual_num_measurements(estimated_duration, mt, requested);
    let acceleration_measurements = crate::util::round_to_usize(crate::util::divide_safely(
        acceleration_time,
        mt,
    ));

    let mut profiles = Vec::with_capacity(ranges.len());
    let mut backlash_correction = false;
    for ((m, axis), k) in devices
        .motors
        .iter()
        .zip(request.axes())
        .zip(&kinematics)
    {
        let to_real = |p: f64| {
            m.real_position_from_pseudo(p)
                .port_err()
                .wrap_err_with(|| format!("converting {p} to real position of '{}'", m.name()))
        };
        let (extended_start, extended_end) = k.extended;
        let real_start = to_real(axis.start)?;
        let real_end = to_real(axis.end)?;
        let real_extended_start = to_real(extended_start)?;
        let real_extended_end = to_real(extended_end)?;

        let backlash = m.quick_scan_backlash().abs();
        if crate::util::divide_safely(backlash, m.scale()).abs() > NEGLIGIBLE_BACKLASH_STEPS {
            backlash_correction = true;
        }
        // Approach the extended start from the side opposite to travel.
        let real_backlash = if real_extended_end >= real_extended_start {
            real_extended_start - backlash
        } else {
            real_extended_start + backlash
        };
        let backlash_position = m
            .pseudo_position_from_real(real_backlash)
            .port_err()
            .wrap_err_with(|| format!("computing backlash position of '{}'", m.name()))?;

        profiles.push(MotionProfile {
            motor: axis.motor.clone(),
            start: axis.start,
            end: axis.end,
            extended_start,
            extended_end,
            real_start,
            real_end,
            real_extended_start,
            real_extended_end,
            backlash_position,
            acceleration_time: k.acceleration_time,
            acceleration_distance: k.acceleration_distance,
            base_velocity: k.base_velocity,
        });
    }

    let plan = AcquisitionPlan {
        measurement,
        measurement_time: mt,
        requested_num_measurements: requested,
        actual_num_measurements: actual,
        premove_measurements,
        acceleration_measurements,
        premove_time,
        acceleration_time,
        body_time,
        estimated_duration,
        backlash_correction,
        ports,
    };
    tracing::debug!(
        requested,
        actual,
        measurement_time = mt,
        estimated_duration,
        acceleration_time,
        backlash = backlash_correction,
        "scan planned"
    );
    Ok((plan, profiles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case::scenario_a(5.7, 0.1, 50, 58)]
    #[case::exact_multiple(1.0, 0.25, 2, 5)]
    #[case::just_over(1.0001, 0.25, 2, 6)]
    #[case::just_over_by_1e_10(1.000_000_000_1, 0.25, 2, 6)]
    #[case::tenths_multiple(0.3, 0.1, 2, 4)]
    #[case::zero_duration(0.0, 0.1, 3, 3)]
    #[case::body_only(0.9, 0.1, 10, 10)]
    fn counts_bins(
        #[case] est: f64,
        #[case] mt: f64,
        #[case] requested: usize,
        #[case] want: usize,
    ) {
        assert_eq!(actual_num_measurements(est, mt, requested), want);
    }

    proptest! {
        #[test]
        fn rounding_is_tight_and_never_truncates(
            mt in 1e-3f64..10.0,
            body_bins in 1usize..500,
            extra in 0.0f64..100.0,
        ) {
            let requested = body_bins + 1;
            #[allow(clippy::cast_precision_loss)]
            let est = mt * body_bins as f64 + extra;
            let n = actual_num_measurements(est, mt, requested);
            prop_assert!(n >= requested);
            #[allow(clippy::cast_precision_loss)]
            let covered = (n - 1) as f64 * mt;
            let slack = 1e-12 * est.max(mt);
            prop_assert!(covered + slack >= est, "n={n} covers {covered} < {est}");
            if n > requested {
                #[allow(clippy::cast_precision_loss)]
                let one_less = (n - 2) as f64 * mt;
                prop_assert!(one_less < est + slack, "n={n} is not minimal");
            }
        }
    }

    #[test]
    fn preset_count_is_unsupported() {
        let err = resolve_measurement_time(
            MeasurementKind::PresetCount { counts: 10 },
            Some(&ClockSource::InternalTimer { mcs: 0 }),
        )
        .expect_err("unsupported");
        assert!(matches!(
            err.downcast_ref::<ScanError>(),
            Some(ScanError::UnsupportedMeasurementKind(_))
        ));
    }

    #[test]
    fn pulse_period_needs_pulse_generator() {
        let err = resolve_measurement_time(
            MeasurementKind::PresetPulsePeriod { seconds: 0.1 },
            Some(&ClockSource::InternalTimer { mcs: 0 }),
        )
        .expect_err("no pulse generator");
        assert_eq!(
            err.downcast_ref::<ScanError>(),
            Some(&ScanError::NoClockAvailable("preset pulse period"))
        );
        let err = resolve_measurement_time(MeasurementKind::PresetTime { seconds: 0.1 }, None)
            .expect_err("no clock");
        assert!(matches!(
            err.downcast_ref::<ScanError>(),
            Some(ScanError::NoClockAvailable(_))
        ));
    }
}
