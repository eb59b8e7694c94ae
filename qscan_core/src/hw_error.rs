//! Maps `Box<dyn Error>` from port boundaries to typed `ScanError`.
//!
//! The traits in `qscan_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our taxonomy, with an optional feature-gated path
//! for `qscan_hardware::HwError` downcasting.

use qscan_traits::PortError;

use crate::error::ScanError;

/// Map a port error to a typed `ScanError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_port_error(e: &(dyn std::error::Error + 'static)) -> ScanError {
    if let Some(scan) = e.downcast_ref::<ScanError>() {
        return scan.clone();
    }

    #[cfg(feature = "hardware-errors")]
    {
        use qscan_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Busy(dev) => ScanError::DeviceBusyConflict(dev.clone()),
                HwError::PauseRequested => ScanError::PauseRequested,
                HwError::Timeout => ScanError::TimedOut(hw.to_string()),
                HwError::Readback { .. } => ScanError::HardwareReadback(hw.to_string()),
                other => ScanError::Hardware(other.to_string()),
            };
        }
    }

    // Fallback: string-based detection
    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("pause") {
        ScanError::PauseRequested
    } else if lower.contains("busy") {
        ScanError::DeviceBusyConflict(s)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ScanError::TimedOut(s)
    } else {
        ScanError::Hardware(s)
    }
}

/// Lift a port result into the crate's `eyre` result with a typed cause.
pub(crate) trait PortResultExt<T> {
    fn port_err(self) -> crate::Result<T>;
}

impl<T> PortResultExt<T> for std::result::Result<T, PortError> {
    fn port_err(self) -> crate::Result<T> {
        self.map_err(|e| eyre::Report::new(map_port_error(&*e)))
    }
}
