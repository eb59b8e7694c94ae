use thiserror::Error;

/// Failure taxonomy of a quick scan.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScanError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("measurement kind '{0}' is not supported for quick scans")]
    UnsupportedMeasurementKind(&'static str),
    #[error("no clock source available for {0} measurements")]
    NoClockAvailable(&'static str),
    #[error("device busy: {0}")]
    DeviceBusyConflict(String),
    #[error("timed out: {0}")]
    TimedOut(String),
    #[error("scan interrupted")]
    Interrupted,
    #[error("pause requested")]
    PauseRequested,
    #[error("hardware readback failed: {0}")]
    HardwareReadback(String),
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("missing measurement kind")]
    MissingMeasurement,
    #[error("scan needs at least one axis")]
    NoAxes,
    #[error("motor '{0}' listed twice")]
    DuplicateMotor(String),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// First `ScanError` in the report's chain, if any.
pub fn classify(report: &Report) -> Option<&ScanError> {
    report
        .chain()
        .find_map(|e| e.downcast_ref::<ScanError>())
}

/// True when the report carries `ScanError::Interrupted`.
pub fn is_interrupted(report: &Report) -> bool {
    matches!(classify(report), Some(ScanError::Interrupted))
}
