//! Capability interfaces the quick-scan engine drives.
//!
//! Every port is a thin seam over an external device driver. Errors cross the
//! boundary as `Box<dyn Error + Send + Sync>`; the engine maps them to its own
//! taxonomy.
pub mod acquisition;
pub mod clock;
pub mod encoder;
pub mod motor;
pub mod sink;

pub use acquisition::{AcquisitionPort, McsMode, PulseGenerator};
pub use clock::{Clock, MonotonicClock};
pub use encoder::{EncoderPort, EncoderType};
pub use motor::{MotorPort, WaitMode};
pub use sink::{DataSink, VecSink};

/// Error type returned across every port boundary.
pub type PortError = Box<dyn std::error::Error + Send + Sync>;
