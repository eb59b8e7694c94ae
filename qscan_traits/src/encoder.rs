use crate::PortError;

/// How the raw values of a position encoder relate to motor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderType {
    /// Raw value is an absolute position in encoder counts.
    Absolute,
    /// Raw value counts steps since the start of acquisition.
    Incremental,
    /// Raw value counts steps within one bin only.
    Delta,
}

/// A per-bin position capture channel of a multichannel encoder.
pub trait EncoderPort {
    fn name(&self) -> &str;
    fn encoder_type(&self) -> EncoderType;

    /// True when this channel observes the named real motor.
    fn can_serve(&self, real_motor: &str) -> bool;
    /// Bind this channel to the motor it observes for the next scan.
    fn connect_to_motor(&mut self, real_motor: &str) -> Result<(), PortError>;

    /// Raw values captured so far, one per completed bin.
    fn read(&mut self) -> Result<Vec<f64>, PortError>;
    /// Number of bins captured so far.
    fn current_count(&mut self) -> Result<usize, PortError>;
}
