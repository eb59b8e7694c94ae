//! Per-sample motor positions from encoder captures or, failing that, a
//! kinematic estimate of the move.

use std::fmt;

use qscan_traits::{EncoderPort, EncoderType, MotorPort};

use crate::error::{Result, ScanError};
use crate::hw_error::PortResultExt;
use crate::planner::{AcquisitionPlan, MotionProfile};
use crate::request::{AlternateRole, ScanRequest};
use crate::util::divide_safely;

/// Where an axis' reported positions came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSource {
    Encoder(EncoderType),
    /// Estimated from the motion profile; not a measurement.
    DeadReckoning,
}

impl fmt::Display for PositionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoder(t) => write!(f, "encoder ({t:?})"),
            Self::DeadReckoning => f.write_str("dead reckoning (estimated)"),
        }
    }
}

/// An encoder channel bound to a scan axis for one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderBinding {
    /// Index of the axis in `ScanDevices::motors`.
    pub axis: usize,
    /// Index of the channel in `ScanDevices::encoders`.
    pub encoder: usize,
    pub encoder_type: EncoderType,
    /// Real-motor scale and offset captured at bind time.
    pub scale: f64,
    pub offset: f64,
}

/// Bind each axis to the first free encoder channel that observes its real
/// motor. Axes without a usable channel are left unbound.
pub fn bind_encoders(
    motors: &[&mut dyn MotorPort],
    encoders: &mut [&mut dyn EncoderPort],
) -> Vec<EncoderBinding> {
    let mut used = vec![false; encoders.len()];
    let mut bindings = Vec::new();
    for (axis, m) in motors.iter().enumerate() {
        let real = m.real_motor_name();
        let Some(k) = (0..encoders.len()).find(|&k| !used[k] && encoders[k].can_serve(real))
        else {
            tracing::debug!(motor = m.name(), "no encoder channel for motor");
            continue;
        };
        let enc = &mut encoders[k];
        if let Err(e) = enc.connect_to_motor(real) {
            tracing::warn!(
                motor = m.name(),
                encoder = enc.name(),
                error = %e,
                "could not connect encoder; positions will be estimated"
            );
            continue;
        }
        used[k] = true;
        tracing::debug!(motor = m.name(), encoder = enc.name(), "encoder bound");
        bindings.push(EncoderBinding {
            axis,
            encoder: k,
            encoder_type: enc.encoder_type(),
            scale: m.scale(),
            offset: m.offset(),
        });
    }
    bindings
}

/// Convert raw encoder values to real-motor positions.
///
/// `seed` is the real position at the extended start and fills index 0 for
/// relative encoders. Entries past the end of `raw` stay `0.0`.
pub fn positions_from_encoder(
    raw: &[f64],
    encoder_type: EncoderType,
    scale: f64,
    offset: f64,
    seed: f64,
    n: usize,
) -> Vec<f64> {
    let mut out = vec![0.0; n];
    if n == 0 {
        return out;
    }
    out[0] = seed;
    let used = raw.len().min(n);
    match encoder_type {
        EncoderType::Absolute => {
            for (p, r) in out.iter_mut().zip(&raw[..used]) {
                *p = offset + scale * r;
            }
        }
        EncoderType::Incremental => {
            for (p, r) in out[1..used.max(1)].iter_mut().zip(raw.iter().skip(1)) {
                *p = seed + scale * r;
            }
        }
        EncoderType::Delta => {
            // A delta sample is the motion during its bin: report the bin
            // centre, not its end.
            let mut sum_of_deltas = seed;
            for (p, r) in out[1..used.max(1)].iter_mut().zip(raw.iter().skip(1)) {
                let step = scale * r;
                *p = sum_of_deltas + 0.5 * step;
                sum_of_deltas += step;
            }
        }
    }
    out
}

/// Constant acceleration that covers `distance` in `time` from `base_velocity`.
pub fn fitted_acceleration(distance: f64, base_velocity: f64, time: f64) -> f64 {
    divide_safely(2.0 * (distance - base_velocity * time), time * time)
}

/// Estimate real-motor positions for every sample from the planned move:
/// at rest, accelerating, slewing, decelerating, at rest.
#[allow(clippy::cast_precision_loss)]
pub fn dead_reckoning(profile: &MotionProfile, plan: &AcquisitionPlan) -> Result<Vec<f64>> {
    let n = plan.actual_num_measurements;
    let mt = plan.measurement_time;
    let accel_time = plan.acceleration_time;
    let num_accel = plan.acceleration_measurements;

    let first_accel = plan.premove_measurements;
    if first_accel >= n {
        return Err(eyre::Report::new(ScanError::Fatal(format!(
            "first acceleration sample {first_accel} is past the buffer of {n}"
        ))));
    }
    let first_body = first_accel + num_accel;
    if first_body >= n {
        return Err(eyre::Report::new(ScanError::Fatal(format!(
            "first body sample {first_body} is past the buffer of {n}"
        ))));
    }

    let mut out = vec![0.0; n];
    out[..first_accel].fill(profile.real_extended_start);

    let distance = (profile.real_start - profile.real_extended_start).abs();
    let v0 = profile.base_velocity;
    let accel = fitted_acceleration(distance, v0, accel_time);
    tracing::debug!(motor = %profile.motor, distance, v0, accel, "fitted acceleration");
    for (j, p) in out[first_accel..first_body].iter_mut().enumerate() {
        let t = mt * j as f64;
        *p = profile.real_extended_start + v0 * t + 0.5 * accel * t * t;
    }

    let first_post_body = (first_body + plan.requested_num_measurements - 1).min(n);
    let slew = divide_safely(profile.real_end - profile.real_start, plan.body_time);
    for (j, p) in out[first_body..first_post_body].iter_mut().enumerate() {
        let t = mt * j as f64;
        *p = profile.real_start + slew * t;
    }

    let first_post_move = (first_post_body + num_accel).min(n);
    let decel = fitted_acceleration(distance, slew, accel_time);
    tracing::debug!(motor = %profile.motor, slew, decel, "fitted slew and deceleration");
    for (j, p) in out[first_post_body..first_post_move].iter_mut().enumerate() {
        let t = mt * j as f64;
        // The ramp down mirrors the fitted acceleration.
        *p = profile.real_end + slew * t - 0.5 * accel * t * t;
    }

    out[first_post_move..].fill(profile.real_extended_end);
    Ok(out)
}

/// Reconstructed positions of one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisPositions {
    /// Positions in the motor's own (possibly pseudo) units.
    pub positions: Vec<f64>,
    /// Same samples in real-motor units, before conversion.
    pub real: Vec<f64>,
    /// Leading samples that hold data; the rest are zero-filled.
    pub valid: usize,
    pub source: PositionSource,
}

/// Positions for every sample of one axis.
///
/// An encoder that cannot be read is reported and replaced by dead
/// reckoning for this axis only.
pub fn reconstruct_axis(
    motor: &dyn MotorPort,
    profile: &MotionProfile,
    plan: &AcquisitionPlan,
    encoder: Option<(&mut dyn EncoderPort, &EncoderBinding)>,
) -> Result<AxisPositions> {
    let n = plan.actual_num_measurements;
    let measured = encoder.and_then(|(enc, binding)| match enc.read() {
        Ok(raw) => {
            if raw.len() != n {
                tracing::warn!(
                    motor = motor.name(),
                    encoder = enc.name(),
                    captured = raw.len(),
                    expected = n,
                    "encoder sample count differs from scaler sample count"
                );
            }
            let real = positions_from_encoder(
                &raw,
                binding.encoder_type,
                binding.scale,
                binding.offset,
                profile.real_extended_start,
                n,
            );
            let valid = raw.len().min(n).max(n.min(1));
            if let Some(bad) = real[..valid].iter().position(|p| !p.is_finite()) {
                let err = ScanError::HardwareReadback(format!(
                    "{}: non-finite position at sample {bad}",
                    enc.name()
                ));
                tracing::warn!(motor = motor.name(), error = %err, "encoder data rejected");
                return None;
            }
            Some((real, valid, PositionSource::Encoder(binding.encoder_type)))
        }
        Err(e) => {
            let err = ScanError::HardwareReadback(format!("{}: {e}", enc.name()));
            tracing::warn!(motor = motor.name(), error = %err, "encoder readout failed");
            None
        }
    });

    let (real, valid, source) = match measured {
        Some(m) => m,
        None => {
            tracing::warn!(
                motor = motor.name(),
                "no encoder data: positions are ESTIMATED from the motion profile. \
                 These are NOT accurate, measured positions"
            );
            (dead_reckoning(profile, plan)?, n, PositionSource::DeadReckoning)
        }
    };

    let positions = to_motor_units(motor, &real, valid)?;
    Ok(AxisPositions {
        positions,
        real,
        valid,
        source,
    })
}

fn to_motor_units(motor: &dyn MotorPort, real: &[f64], valid: usize) -> Result<Vec<f64>> {
    let mut out = real.to_vec();
    for p in &mut out[..valid] {
        *p = motor.pseudo_position_from_real(*p).port_err()?;
    }
    Ok(out)
}

/// An alternate X motor matched to the scan axis whose real motor it shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAlternate {
    /// Index into `ScanDevices::alternates`.
    pub device: usize,
    pub axis: usize,
    pub role: AlternateRole,
}

/// Match every alternate motor of the request to an encoder-bound axis.
///
/// Fails with `Configuration` if a motor is not available or no bound axis
/// shares its real motor.
pub fn resolve_alternates(
    request: &ScanRequest,
    alternates: &[&dyn MotorPort],
    motors: &[&mut dyn MotorPort],
    bindings: &[EncoderBinding],
) -> Result<Vec<ResolvedAlternate>> {
    let mut out = Vec::with_capacity(request.alternates().len());
    for alt in request.alternates() {
        let device = alternates
            .iter()
            .position(|m| m.name() == alt.motor)
            .ok_or_else(|| {
                eyre::Report::new(ScanError::Configuration(format!(
                    "alternate motor '{}' is not available",
                    alt.motor
                )))
            })?;
        let real = alternates[device].real_motor_name();
        let axis = bindings
            .iter()
            .map(|b| b.axis)
            .find(|&axis| motors[axis].real_motor_name() == real)
            .ok_or_else(|| {
                eyre::Report::new(ScanError::Configuration(format!(
                    "no encoder-bound scan axis is compatible with alternate motor '{}'",
                    alt.motor
                )))
            })?;
        tracing::debug!(alternate = %alt.motor, axis = motors[axis].name(), "alternate resolved");
        out.push(ResolvedAlternate {
            device,
            axis,
            role: alt.role,
        });
    }
    Ok(out)
}

/// Positions of an alternate motor, derived from its axis' real positions.
pub fn alternate_positions(alternate: &dyn MotorPort, axis: &AxisPositions) -> Result<Vec<f64>> {
    to_motor_units(alternate, &axis.real, axis.valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(EncoderType::Incremental, &[0.0, 1.0, 3.0], vec![5.0, 7.0, 11.0])]
    #[case(EncoderType::Delta, &[9.0, 1.0, 1.0], vec![5.0, 6.0, 8.0])]
    #[case(EncoderType::Absolute, &[0.0, 1.0, 3.0], vec![1.0, 3.0, 7.0])]
    fn converts_by_encoder_type(
        #[case] ty: EncoderType,
        #[case] raw: &[f64],
        #[case] expected: Vec<f64>,
    ) {
        assert_eq!(positions_from_encoder(raw, ty, 2.0, 1.0, 5.0, 3), expected);
    }

    #[test]
    fn short_encoder_leaves_zeros() {
        let p = positions_from_encoder(&[0.0, 1.0], EncoderType::Incremental, 1.0, 0.0, 3.0, 4);
        assert_eq!(p, vec![3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn long_encoder_is_truncated() {
        let p = positions_from_encoder(&[1.0; 6], EncoderType::Absolute, 1.0, 0.0, 0.0, 3);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn fitted_acceleration_matches_distance() {
        assert!((fitted_acceleration(1.0, 0.0, 0.5) - 8.0).abs() < 1e-12);
        // With a base velocity the ramp covers part of the distance itself.
        assert!((fitted_acceleration(1.0, 1.0, 0.5) - 4.0).abs() < 1e-12);
    }
}
