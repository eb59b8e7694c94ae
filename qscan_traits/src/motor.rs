use crate::PortError;

/// How an absolute move is issued. Moves never block; callers poll `is_busy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Return immediately after the move is accepted.
    NoWait,
    /// Return immediately and skip the driver's own backlash correction.
    NoWaitIgnoreBacklash,
}

/// A positioner as seen by the scan engine.
///
/// Positions are in user units of this motor. For a pseudomotor, "real"
/// positions are in the units of the single underlying real motor that an
/// encoder would observe.
pub trait MotorPort {
    fn name(&self) -> &str;

    /// Name of the real motor under this one (itself when not a pseudomotor).
    fn real_motor_name(&self) -> &str {
        self.name()
    }

    fn is_pseudomotor(&self) -> bool {
        false
    }

    fn move_absolute(&mut self, target: f64, mode: WaitMode) -> Result<(), PortError>;
    fn position(&mut self) -> Result<f64, PortError>;
    fn is_busy(&mut self) -> Result<bool, PortError>;
    fn soft_abort(&mut self) -> Result<(), PortError>;

    /// Time to ramp from base speed to the currently configured speed.
    fn acceleration_time(&mut self) -> Result<f64, PortError>;
    /// Distance covered while ramping to the currently configured speed.
    fn acceleration_distance(&mut self) -> Result<f64, PortError>;
    fn base_speed(&mut self) -> Result<f64, PortError>;

    /// Override the speed so a move from `start` to `end` takes `duration` seconds.
    fn set_speed_between(&mut self, start: f64, end: f64, duration: f64)
    -> Result<(), PortError>;
    /// Undo the last `set_speed_between`.
    fn restore_speed(&mut self) -> Result<(), PortError>;

    /// Backlash pre-move distance for quick scans, in real-motor units.
    fn quick_scan_backlash(&self) -> f64 {
        0.0
    }
    /// Real-motor scale (user units per raw step).
    fn scale(&self) -> f64 {
        1.0
    }
    /// Real-motor offset in user units.
    fn offset(&self) -> f64 {
        0.0
    }

    fn real_position_from_pseudo(&self, pseudo: f64) -> Result<f64, PortError> {
        Ok(pseudo)
    }
    fn pseudo_position_from_real(&self, real: f64) -> Result<f64, PortError> {
        Ok(real)
    }

    /// Start/end positions widened by the acceleration distance so the
    /// nominal window is crossed at full speed.
    ///
    /// Drivers with non-trivial kinematics may override this.
    fn extended_scan_range(&mut self, start: f64, end: f64) -> Result<(f64, f64), PortError> {
        let accel = self.acceleration_distance()?.abs();
        if end >= start {
            Ok((start - accel, end + accel))
        } else {
            Ok((start + accel, end - accel))
        }
    }
}

impl<M: MotorPort + ?Sized> MotorPort for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn real_motor_name(&self) -> &str {
        (**self).real_motor_name()
    }
    fn is_pseudomotor(&self) -> bool {
        (**self).is_pseudomotor()
    }
    fn move_absolute(&mut self, target: f64, mode: WaitMode) -> Result<(), PortError> {
        (**self).move_absolute(target, mode)
    }
    fn position(&mut self) -> Result<f64, PortError> {
        (**self).position()
    }
    fn is_busy(&mut self) -> Result<bool, PortError> {
        (**self).is_busy()
    }
    fn soft_abort(&mut self) -> Result<(), PortError> {
        (**self).soft_abort()
    }
    fn acceleration_time(&mut self) -> Result<f64, PortError> {
        (**self).acceleration_time()
    }
    fn acceleration_distance(&mut self) -> Result<f64, PortError> {
        (**self).acceleration_distance()
    }
    fn base_speed(&mut self) -> Result<f64, PortError> {
        (**self).base_speed()
    }
    fn set_speed_between(
        &mut self,
        start: f64,
        end: f64,
        duration: f64,
    ) -> Result<(), PortError> {
        (**self).set_speed_between(start, end, duration)
    }
    fn restore_speed(&mut self) -> Result<(), PortError> {
        (**self).restore_speed()
    }
    fn quick_scan_backlash(&self) -> f64 {
        (**self).quick_scan_backlash()
    }
    fn scale(&self) -> f64 {
        (**self).scale()
    }
    fn offset(&self) -> f64 {
        (**self).offset()
    }
    fn real_position_from_pseudo(&self, pseudo: f64) -> Result<f64, PortError> {
        (**self).real_position_from_pseudo(pseudo)
    }
    fn pseudo_position_from_real(&self, real: f64) -> Result<f64, PortError> {
        (**self).pseudo_position_from_real(real)
    }
    fn extended_scan_range(&mut self, start: f64, end: f64) -> Result<(f64, f64), PortError> {
        (**self).extended_scan_range(start, end)
    }
}
