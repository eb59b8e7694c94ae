//! Runtime tuning for the scan engine.
//!
//! These are separate from the TOML-deserialized config in `qscan_config`;
//! see `conversions` for the bridge.

use std::time::Duration;

/// Motor polling behaviour.
#[derive(Debug, Clone)]
pub struct MotionCfg {
    /// Sleep between busy polls.
    pub poll_interval: Duration,
    /// Abort a move that is still running after this long. `None` waits forever.
    pub move_timeout: Option<Duration>,
}

impl Default for MotionCfg {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
            move_timeout: None,
        }
    }
}

/// MCS arming and completion behaviour.
#[derive(Debug, Clone)]
pub struct AcquisitionCfg {
    /// Stationary bins recorded before the motors leave the extended start
    /// (and, symmetrically, after they reach the extended end).
    pub premove_measurements: usize,
    pub start_poll_interval: Duration,
    pub start_poll_attempts: u32,
    pub completion_poll_interval: Duration,
    /// How far past the estimated duration the body may run before
    /// `TimedOut`. `None` disables the check.
    pub completion_margin: Option<Duration>,
}

impl Default for AcquisitionCfg {
    fn default() -> Self {
        Self {
            premove_measurements: 2,
            start_poll_interval: Duration::from_millis(10),
            start_poll_attempts: 100,
            completion_poll_interval: Duration::from_millis(100),
            completion_margin: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineCfg {
    pub motion: MotionCfg,
    pub acquisition: AcquisitionCfg,
}
