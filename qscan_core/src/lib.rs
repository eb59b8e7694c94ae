#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Quick-scan synchronization engine (hardware-agnostic).
//!
//! Drives one or more motors continuously while multichannel scalers sample
//! on a fixed time or pulse grid, then reconstructs a position for every
//! sample. All hardware goes through the ports in `qscan_traits`.
//!
//! ## Architecture
//!
//! - **Planning**: extended ranges, sample counts and speed synchronization (`planner`)
//! - **Motion**: multi-axis moves with pause/interrupt polling (`motion`)
//! - **Acquisition**: arming, starting and draining the scalers (`acquisition`)
//! - **Reconstruction**: encoder or dead-reckoning positions (`reconstruct`)
//! - **Lifecycle**: the state machine tying it together (`lifecycle`)
//!
//! ## Single control thread
//!
//! Every device call is a non-blocking start followed by bounded polling.
//! The only suspension points are the poll loops, and each one checks the
//! `CancellationToken` once per iteration.

pub mod acquisition;
pub mod config;
pub mod control;
pub mod conversions;
pub mod devices;
pub mod error;
pub mod hw_error;
pub mod lifecycle;
pub mod motion;
pub mod planner;
pub mod reconstruct;
pub mod request;
pub mod util;

pub use config::{AcquisitionCfg, EngineCfg, MotionCfg};
pub use control::{CancellationToken, PauseHandler, ScanContext, ScanControl};
pub use devices::{ClockSource, ScalerInput, ScanDevices};
pub use error::{BuildError, Report, Result, ScanError, classify, is_interrupted};
pub use lifecycle::{QuickScan, ScanReport, ScanState};
pub use planner::{AcquisitionPlan, MotionProfile, SpeedOverrideGuard};
pub use reconstruct::{EncoderBinding, PositionSource};
pub use request::{
    AlternateMotor, AlternateRole, AxisRequest, MeasurementKind, ScanRequest, ScanRequestBuilder,
};

#[cfg(any(test, feature = "test-util"))]
pub use qscan_traits::clock::test_clock::TestClock;
