use qscan_traits::{EncoderPort, EncoderType, MotorPort, PortError};

use super::{BinTiming, Faults, SharedClock, SimAxis, SimMotor};
use crate::error::HwError;

/// One MCE channel watching a simulated motor's axis, sampled on the shared
/// bin grid.
pub struct SimEncoder {
    name: String,
    encoder_type: EncoderType,
    serves: String,
    axis: SimAxis,
    scale: f64,
    offset: f64,
    clock: SharedClock,
    timing: BinTiming,
    connected: Option<String>,
    faults: Faults,
}

impl SimEncoder {
    pub fn new(
        name: impl Into<String>,
        encoder_type: EncoderType,
        motor: &SimMotor,
        timing: BinTiming,
        clock: SharedClock,
    ) -> Self {
        Self {
            name: name.into(),
            encoder_type,
            serves: motor.real_motor_name().to_string(),
            axis: motor.axis().clone(),
            scale: motor.scale(),
            offset: motor.offset(),
            clock,
            timing,
            connected: None,
            faults: Faults::default(),
        }
    }

    pub fn faults(&self) -> Faults {
        self.faults.clone()
    }

    pub fn connected_motor(&self) -> Option<&str> {
        self.connected.as_deref()
    }

    fn raw_for_bin(&self, i: usize) -> Option<f64> {
        let (start, end) = self.timing.bin_bounds(i)?;
        let t0 = self.timing.started_at()?;
        let mid = start + (end - start) / 2;
        let scale = if self.scale.abs() < f64::EPSILON {
            1.0
        } else {
            self.scale
        };
        let raw = match self.encoder_type {
            EncoderType::Absolute => (self.axis.position_at(mid) - self.offset) / scale,
            EncoderType::Incremental => {
                (self.axis.position_at(mid) - self.axis.position_at(t0)) / scale
            }
            EncoderType::Delta => {
                (self.axis.position_at(end) - self.axis.position_at(start)) / scale
            }
        };
        Some(raw)
    }
}

impl EncoderPort for SimEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn encoder_type(&self) -> EncoderType {
        self.encoder_type
    }

    fn can_serve(&self, real_motor: &str) -> bool {
        self.serves == real_motor
    }

    fn connect_to_motor(&mut self, real_motor: &str) -> Result<(), PortError> {
        self.faults.check(&self.name, "connect")?;
        if !self.can_serve(real_motor) {
            return Err(HwError::InvalidArgument(format!(
                "{} observes '{}', not '{real_motor}'",
                self.name, self.serves
            ))
            .into());
        }
        self.connected = Some(real_motor.to_string());
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<f64>, PortError> {
        self.faults.check(&self.name, "read")?;
        if self.connected.is_none() {
            return Err(HwError::NotConnected {
                device: self.name.clone(),
            }
            .into());
        }
        let n = self.timing.completed_bins(self.clock.now());
        Ok((0..n).filter_map(|i| self.raw_for_bin(i)).collect())
    }

    fn current_count(&mut self) -> Result<usize, PortError> {
        self.faults.check(&self.name, "current_count")?;
        Ok(self.timing.completed_bins(self.clock.now()))
    }
}
