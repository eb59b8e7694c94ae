//! `From` implementations bridging `qscan_config` types to `qscan_core` types.

use std::time::Duration;

use crate::config::{AcquisitionCfg, EngineCfg, MotionCfg};
use crate::request::{AlternateRole, AxisRequest, MeasurementKind, ScanRequest};

fn optional_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

// ── MotionCfg ────────────────────────────────────────────────────────────────

impl From<&qscan_config::MotionCfg> for MotionCfg {
    fn from(c: &qscan_config::MotionCfg) -> Self {
        Self {
            poll_interval: Duration::from_millis(c.poll_ms.max(1)),
            move_timeout: optional_ms(c.move_timeout_ms),
        }
    }
}

// ── AcquisitionCfg ───────────────────────────────────────────────────────────

impl From<&qscan_config::AcquisitionCfg> for AcquisitionCfg {
    fn from(c: &qscan_config::AcquisitionCfg) -> Self {
        Self {
            premove_measurements: c.premove_measurements,
            start_poll_interval: Duration::from_millis(c.start_poll_ms.max(1)),
            start_poll_attempts: c.start_poll_attempts.max(1),
            completion_poll_interval: Duration::from_millis(c.completion_poll_ms.max(1)),
            completion_margin: optional_ms(c.completion_margin_ms),
        }
    }
}

impl From<&qscan_config::Config> for EngineCfg {
    fn from(c: &qscan_config::Config) -> Self {
        Self {
            motion: (&c.motion).into(),
            acquisition: (&c.acquisition).into(),
        }
    }
}

// ── ScanRequest ──────────────────────────────────────────────────────────────

impl From<&qscan_config::ScanCfg> for MeasurementKind {
    fn from(c: &qscan_config::ScanCfg) -> Self {
        match c.measurement {
            qscan_config::MeasurementCfg::PresetTime => Self::PresetTime {
                seconds: c.measurement_time,
            },
            qscan_config::MeasurementCfg::PresetPulsePeriod => Self::PresetPulsePeriod {
                seconds: c.measurement_time,
            },
            qscan_config::MeasurementCfg::PresetCount => Self::PresetCount {
                counts: c.preset_count,
            },
        }
    }
}

impl TryFrom<&qscan_config::ScanCfg> for ScanRequest {
    type Error = eyre::Report;

    fn try_from(c: &qscan_config::ScanCfg) -> Result<Self, Self::Error> {
        let mut b = ScanRequest::builder()
            .measurement(MeasurementKind::from(c))
            .num_measurements(c.num_measurements);
        for a in &c.axes {
            b = b.axis(AxisRequest::new(&a.motor, a.start, a.end));
        }
        for m in &c.alternate.datafile {
            b = b.alternate(m, AlternateRole::Datafile);
        }
        for m in &c.alternate.plot {
            b = b.alternate(m, AlternateRole::Plot);
        }
        b.build()
    }
}
