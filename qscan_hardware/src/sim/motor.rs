use qscan_traits::{MotorPort, PortError, WaitMode};

use super::{Faults, SharedClock, SimAxis};
use crate::error::HwError;

/// Kinematic and calibration parameters of a simulated real motor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorParams {
    /// Slew speed in real units per second.
    pub speed: f64,
    pub base_speed: f64,
    pub acceleration_time: f64,
    pub scale: f64,
    pub offset: f64,
    pub backlash: f64,
}

impl Default for MotorParams {
    fn default() -> Self {
        Self {
            speed: 1.0,
            base_speed: 0.0,
            acceleration_time: 0.2,
            scale: 1.0,
            offset: 0.0,
            backlash: 0.0,
        }
    }
}

/// `pseudo = gain * real + bias`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearPseudo {
    pub real_name: String,
    pub gain: f64,
    pub bias: f64,
}

impl LinearPseudo {
    fn to_pseudo(&self, real: f64) -> f64 {
        self.gain * real + self.bias
    }

    fn to_real(&self, pseudo: f64) -> Result<f64, HwError> {
        if self.gain.abs() < f64::EPSILON {
            return Err(HwError::InvalidArgument(format!(
                "pseudomotor over '{}' has zero gain",
                self.real_name
            )));
        }
        Ok((pseudo - self.bias) / self.gain)
    }
}

/// Simulated motor, optionally presented as a linear pseudomotor over its
/// axis.
pub struct SimMotor {
    name: String,
    clock: SharedClock,
    axis: SimAxis,
    params: MotorParams,
    saved_speed: Option<f64>,
    pseudo: Option<LinearPseudo>,
    faults: Faults,
    moves: Vec<(f64, WaitMode)>,
    soft_aborts: usize,
}

impl SimMotor {
    pub fn new(name: impl Into<String>, clock: SharedClock, position: f64) -> Self {
        Self {
            name: name.into(),
            clock,
            axis: SimAxis::new(position),
            params: MotorParams::default(),
            saved_speed: None,
            pseudo: None,
            faults: Faults::default(),
            moves: Vec::new(),
            soft_aborts: 0,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: MotorParams) -> Self {
        self.params = params;
        self
    }

    /// Present this motor as a pseudomotor named `self.name` over the real
    /// motor `pseudo.real_name`.
    #[must_use]
    pub fn with_pseudo(mut self, pseudo: LinearPseudo) -> Self {
        self.pseudo = Some(pseudo);
        self
    }

    /// Another view of the same axis, e.g. a pseudomotor over this motor.
    pub fn view(&self, name: impl Into<String>, pseudo: Option<LinearPseudo>) -> Self {
        Self {
            name: name.into(),
            clock: self.clock.clone(),
            axis: self.axis.clone(),
            params: self.params,
            saved_speed: None,
            pseudo,
            faults: Faults::default(),
            moves: Vec::new(),
            soft_aborts: 0,
        }
    }

    pub fn axis(&self) -> &SimAxis {
        &self.axis
    }

    pub fn faults(&self) -> Faults {
        self.faults.clone()
    }

    /// Current slew speed in real units per second.
    pub fn speed(&self) -> f64 {
        self.params.speed
    }

    pub fn moves(&self) -> &[(f64, WaitMode)] {
        &self.moves
    }

    pub fn soft_abort_count(&self) -> usize {
        self.soft_aborts
    }

    /// Real position without fault injection.
    pub fn real_position_now(&self) -> f64 {
        self.axis.position_at(self.clock.now())
    }

    pub fn is_moving(&self) -> bool {
        self.axis.is_moving(self.clock.now())
    }

    fn to_real(&self, p: f64) -> Result<f64, HwError> {
        self.pseudo.as_ref().map_or(Ok(p), |t| t.to_real(p))
    }

    fn to_pseudo(&self, r: f64) -> f64 {
        self.pseudo.as_ref().map_or(r, |t| t.to_pseudo(r))
    }

    fn gain(&self) -> f64 {
        self.pseudo.as_ref().map_or(1.0, |t| t.gain.abs())
    }
}

impl MotorPort for SimMotor {
    fn name(&self) -> &str {
        &self.name
    }

    fn real_motor_name(&self) -> &str {
        self.pseudo
            .as_ref()
            .map_or(self.name.as_str(), |t| t.real_name.as_str())
    }

    fn is_pseudomotor(&self) -> bool {
        self.pseudo.is_some()
    }

    fn move_absolute(&mut self, target: f64, mode: WaitMode) -> Result<(), PortError> {
        self.faults.check(&self.name, "move")?;
        let now = self.clock.now();
        if self.axis.is_moving(now) {
            return Err(HwError::Busy(self.name.clone()).into());
        }
        if !target.is_finite() {
            return Err(HwError::InvalidArgument(format!("{}: target {target}", self.name)).into());
        }
        let real = self.to_real(target)?;
        tracing::trace!(motor = %self.name, target, real, ?mode, "sim move");
        self.axis.start_move(now, real, self.params.speed);
        self.moves.push((target, mode));
        Ok(())
    }

    fn position(&mut self) -> Result<f64, PortError> {
        self.faults.check(&self.name, "position")?;
        Ok(self.to_pseudo(self.real_position_now()))
    }

    fn is_busy(&mut self) -> Result<bool, PortError> {
        self.faults.check(&self.name, "is_busy")?;
        Ok(self.is_moving())
    }

    fn soft_abort(&mut self) -> Result<(), PortError> {
        self.faults.check(&self.name, "soft_abort")?;
        self.axis.halt(self.clock.now());
        self.soft_aborts += 1;
        Ok(())
    }

    fn acceleration_time(&mut self) -> Result<f64, PortError> {
        self.faults.check(&self.name, "acceleration_time")?;
        Ok(self.params.acceleration_time)
    }

    fn acceleration_distance(&mut self) -> Result<f64, PortError> {
        self.faults.check(&self.name, "acceleration_distance")?;
        // Ramp from base speed to slew speed at constant acceleration.
        let p = &self.params;
        Ok(0.5 * (p.base_speed + p.speed) * p.acceleration_time * self.gain())
    }

    fn base_speed(&mut self) -> Result<f64, PortError> {
        Ok(self.params.base_speed)
    }

    fn set_speed_between(
        &mut self,
        start: f64,
        end: f64,
        duration: f64,
    ) -> Result<(), PortError> {
        self.faults.check(&self.name, "set_speed")?;
        if !(duration.is_finite() && duration > 0.0) {
            return Err(
                HwError::InvalidArgument(format!("{}: duration {duration}", self.name)).into(),
            );
        }
        let dist = (self.to_real(end)? - self.to_real(start)?).abs();
        if self.saved_speed.is_none() {
            self.saved_speed = Some(self.params.speed);
        }
        if dist > 0.0 {
            self.params.speed = dist / duration;
        }
        Ok(())
    }

    fn restore_speed(&mut self) -> Result<(), PortError> {
        self.faults.check(&self.name, "restore_speed")?;
        if let Some(speed) = self.saved_speed.take() {
            self.params.speed = speed;
        }
        Ok(())
    }

    fn quick_scan_backlash(&self) -> f64 {
        self.params.backlash
    }

    fn scale(&self) -> f64 {
        self.params.scale
    }

    fn offset(&self) -> f64 {
        self.params.offset
    }

    fn real_position_from_pseudo(&self, pseudo: f64) -> Result<f64, PortError> {
        Ok(self.to_real(pseudo)?)
    }

    fn pseudo_position_from_real(&self, real: f64) -> Result<f64, PortError> {
        Ok(self.to_pseudo(real))
    }
}
