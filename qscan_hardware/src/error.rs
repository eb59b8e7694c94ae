use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("{device}: injected fault in {op}")]
    Injected { device: String, op: &'static str },
    #[error("{0}: device busy")]
    Busy(String),
    #[error("pause requested")]
    PauseRequested,
    #[error("device timeout")]
    Timeout,
    #[error("{device}: readback failed: {reason}")]
    Readback { device: String, reason: String },
    #[error("{device}: not connected to a motor")]
    NotConnected { device: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, HwError>;
