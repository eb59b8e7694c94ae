use crate::PortError;

/// Counting mode of a multichannel scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McsMode {
    /// Each bin lasts a fixed measurement time.
    PresetTime,
    /// Each bin lasts until a fixed number of counts is reached.
    PresetCount,
}

/// A multichannel scaler (MCS): a counter that records one value per time
/// bin for each of its channels.
pub trait AcquisitionPort {
    fn name(&self) -> &str;

    fn set_mode(&mut self, mode: McsMode) -> Result<(), PortError>;
    fn set_measurement_time(&mut self, seconds: f64) -> Result<(), PortError>;
    fn set_num_measurements(&mut self, n: usize) -> Result<(), PortError>;
    fn clear(&mut self) -> Result<(), PortError>;

    /// Arm or start counting. With external channel advance enabled the
    /// device waits for clock pulses.
    fn start(&mut self) -> Result<(), PortError>;
    fn stop(&mut self) -> Result<(), PortError>;
    fn is_busy(&mut self) -> Result<bool, PortError>;

    fn set_external_channel_advance(&mut self, enabled: bool) -> Result<(), PortError>;
    fn set_external_prescale(&mut self, prescale: u32) -> Result<(), PortError>;

    /// Per-bin counts recorded on `channel`, one entry per measurement.
    fn read_scaler(&mut self, channel: usize) -> Result<Vec<i64>, PortError>;
}

/// External pulse source that clocks an MCS at a fixed period.
pub trait PulseGenerator {
    fn name(&self) -> &str;

    fn set_pulse_period(&mut self, seconds: f64) -> Result<(), PortError>;
    fn set_pulse_width(&mut self, seconds: f64) -> Result<(), PortError>;
    fn set_num_pulses(&mut self, n: usize) -> Result<(), PortError>;
    fn start(&mut self) -> Result<(), PortError>;
    fn stop(&mut self) -> Result<(), PortError>;
    fn is_busy(&mut self) -> Result<bool, PortError>;
}
