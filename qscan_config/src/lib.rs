#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for quick scans.
//!
//! - `Config` and its sections are deserialized from TOML and checked by
//!   `Config::validate`.
//! - `[bench]` describes the simulated devices the CLI wires up when no real
//!   hardware layer is available.
use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

// ── [scan] ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementCfg {
    PresetTime,
    PresetPulsePeriod,
    PresetCount,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AxisCfg {
    pub motor: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputCfg {
    pub name: String,
    pub mcs: String,
    pub channel: usize,
    /// Counts per second subtracted from every bin.
    #[serde(default)]
    pub dark_current: f64,
}

/// Motors logged in place of the scan axes in the datafile and/or the plot.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AlternateCfg {
    pub datafile: Vec<String>,
    pub plot: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanCfg {
    pub measurement: MeasurementCfg,
    /// Seconds per bin (time or pulse period). Preset count uses `preset_count`.
    #[serde(default)]
    pub measurement_time: f64,
    #[serde(default)]
    pub preset_count: u64,
    pub num_measurements: usize,
    pub axes: Vec<AxisCfg>,
    #[serde(default)]
    pub inputs: Vec<InputCfg>,
    #[serde(default)]
    pub alternate: AlternateCfg,
}

// ── Engine tuning ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MotionCfg {
    /// Interval between motor busy polls.
    pub poll_ms: u64,
    /// Give up on a move after this long (0 = wait forever).
    pub move_timeout_ms: u64,
}

impl Default for MotionCfg {
    fn default() -> Self {
        Self {
            poll_ms: 20,
            move_timeout_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AcquisitionCfg {
    /// Bins recorded while motors sit at the extended start and end.
    pub premove_measurements: usize,
    pub start_poll_ms: u64,
    pub start_poll_attempts: u32,
    pub completion_poll_ms: u64,
    /// Slack past the estimated duration before the body wait gives up
    /// (0 = never).
    pub completion_margin_ms: u64,
}

impl Default for AcquisitionCfg {
    fn default() -> Self {
        Self {
            premove_measurements: 2,
            start_poll_ms: 10,
            start_poll_attempts: 100,
            completion_poll_ms: 100,
            completion_margin_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputCfg {
    /// Datafile path; stdout when absent.
    pub datafile: Option<String>,
    /// Separate plot-row file, written only when set.
    pub plotfile: Option<String>,
    pub header: bool,
}

impl Default for OutputCfg {
    fn default() -> Self {
        Self {
            datafile: None,
            plotfile: None,
            header: true,
        }
    }
}

// ── [bench] ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKindCfg {
    Absolute,
    Incremental,
    Delta,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PseudoCfg {
    /// Name of the bench motor this pseudomotor is computed from.
    pub real: String,
    #[serde(default = "one")]
    pub gain: f64,
    #[serde(default)]
    pub bias: f64,
}

const fn one() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BenchMotorCfg {
    pub name: String,
    pub position: f64,
    pub speed: f64,
    pub base_speed: f64,
    pub acceleration_time: f64,
    pub scale: f64,
    pub offset: f64,
    pub backlash: f64,
    pub encoder: Option<EncoderKindCfg>,
    pub pseudo: Option<PseudoCfg>,
}

impl Default for BenchMotorCfg {
    fn default() -> Self {
        Self {
            name: String::new(),
            position: 0.0,
            speed: 1.0,
            base_speed: 0.0,
            acceleration_time: 0.2,
            scale: 1.0,
            offset: 0.0,
            backlash: 0.0,
            encoder: None,
            pseudo: None,
        }
    }
}

/// Count-rate model of one simulated scaler channel.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum ChannelCfg {
    Peak {
        motor: String,
        center: f64,
        fwhm: f64,
        height: f64,
        #[serde(default)]
        background: f64,
    },
    Rate {
        rate: f64,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct BenchMcsCfg {
    pub name: String,
    #[serde(default)]
    pub channels: Vec<ChannelCfg>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BenchCfg {
    pub motors: Vec<BenchMotorCfg>,
    pub mcs: Vec<BenchMcsCfg>,
    /// Name of a simulated pulse generator; required for preset pulse period.
    pub pulse_generator: Option<String>,
    /// MCS whose internal timer paces preset-time scans (default: first input's MCS).
    pub timer: Option<String>,
    /// Run the simulated devices on a virtual clock instead of wall time.
    pub virtual_time: bool,
}

impl BenchCfg {
    pub fn motor(&self, name: &str) -> Option<&BenchMotorCfg> {
        self.motors.iter().find(|m| m.name == name)
    }

    pub fn mcs(&self, name: &str) -> Option<&BenchMcsCfg> {
        self.mcs.iter().find(|m| m.name == name)
    }
}

// ── Root ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub scan: ScanCfg,
    #[serde(default)]
    pub motion: MotionCfg,
    #[serde(default)]
    pub acquisition: AcquisitionCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub output: OutputCfg,
    #[serde(default)]
    pub bench: Option<BenchCfg>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
    load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))
}

fn finite_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Scan
        let scan = &self.scan;
        match scan.measurement {
            MeasurementCfg::PresetTime | MeasurementCfg::PresetPulsePeriod => {
                if !finite_positive(scan.measurement_time) {
                    eyre::bail!("scan.measurement_time must be > 0");
                }
            }
            MeasurementCfg::PresetCount => {
                if scan.preset_count == 0 {
                    eyre::bail!("scan.preset_count must be >= 1");
                }
            }
        }
        if scan.num_measurements < 2 {
            eyre::bail!("scan.num_measurements must be >= 2");
        }
        if scan.axes.is_empty() {
            eyre::bail!("scan.axes must list at least one motor");
        }
        let mut seen = HashSet::new();
        for axis in &scan.axes {
            if axis.motor.trim().is_empty() {
                eyre::bail!("scan.axes: motor name must not be empty");
            }
            if !seen.insert(axis.motor.as_str()) {
                eyre::bail!("scan.axes: motor '{}' listed twice", axis.motor);
            }
            if !(axis.start.is_finite() && axis.end.is_finite()) {
                eyre::bail!("scan.axes: '{}' start/end must be finite", axis.motor);
            }
        }
        for input in &scan.inputs {
            if !input.dark_current.is_finite() || input.dark_current < 0.0 {
                eyre::bail!("scan.inputs: '{}' dark_current must be >= 0", input.name);
            }
        }

        // Motion
        if self.motion.poll_ms == 0 {
            eyre::bail!("motion.poll_ms must be >= 1");
        }

        // Acquisition
        if self.acquisition.premove_measurements > 1000 {
            eyre::bail!("acquisition.premove_measurements is unreasonably large (>1000)");
        }
        if self.acquisition.start_poll_ms == 0 {
            eyre::bail!("acquisition.start_poll_ms must be >= 1");
        }
        if self.acquisition.start_poll_attempts == 0 {
            eyre::bail!("acquisition.start_poll_attempts must be >= 1");
        }
        if self.acquisition.completion_poll_ms == 0 {
            eyre::bail!("acquisition.completion_poll_ms must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        if let Some(bench) = &self.bench {
            self.validate_bench(bench)?;
        }
        Ok(())
    }

    fn validate_bench(&self, bench: &BenchCfg) -> eyre::Result<()> {
        let mut names = HashSet::new();
        for m in &bench.motors {
            if !names.insert(m.name.as_str()) {
                eyre::bail!("bench.motors: duplicate motor '{}'", m.name);
            }
            if !finite_positive(m.speed) {
                eyre::bail!("bench.motors: '{}' speed must be > 0", m.name);
            }
            if !m.acceleration_time.is_finite() || m.acceleration_time < 0.0 {
                eyre::bail!("bench.motors: '{}' acceleration_time must be >= 0", m.name);
            }
            if m.base_speed < 0.0 || m.base_speed > m.speed {
                eyre::bail!("bench.motors: '{}' base_speed must be in [0, speed]", m.name);
            }
            if !m.scale.is_finite() || m.scale == 0.0 {
                eyre::bail!("bench.motors: '{}' scale must be non-zero", m.name);
            }
            if let Some(p) = &m.pseudo {
                let Some(real) = bench.motor(&p.real) else {
                    eyre::bail!(
                        "bench.motors: pseudomotor '{}' refers to unknown motor '{}'",
                        m.name,
                        p.real
                    );
                };
                if real.pseudo.is_some() {
                    eyre::bail!(
                        "bench.motors: pseudomotor '{}' must sit on a real motor",
                        m.name
                    );
                }
                if !p.gain.is_finite() || p.gain == 0.0 {
                    eyre::bail!("bench.motors: pseudomotor '{}' gain must be non-zero", m.name);
                }
                if m.encoder.is_some() {
                    eyre::bail!(
                        "bench.motors: pseudomotor '{}' cannot own an encoder; attach it to '{}'",
                        m.name,
                        p.real
                    );
                }
            }
        }
        for mcs in &bench.mcs {
            for ch in &mcs.channels {
                if let ChannelCfg::Peak { motor, .. } = ch
                    && bench.motor(motor).is_none()
                {
                    eyre::bail!("bench.mcs: '{}' peak refers to unknown motor '{motor}'", mcs.name);
                }
            }
        }

        let scan = &self.scan;
        for axis in &scan.axes {
            if bench.motor(&axis.motor).is_none() {
                eyre::bail!("scan.axes: motor '{}' is not on the bench", axis.motor);
            }
        }
        for alt in scan.alternate.datafile.iter().chain(&scan.alternate.plot) {
            if bench.motor(alt).is_none() {
                eyre::bail!("scan.alternate: motor '{alt}' is not on the bench");
            }
            if scan.axes.iter().any(|a| &a.motor == alt) {
                eyre::bail!("scan.alternate: motor '{alt}' is also a scan axis");
            }
        }
        for input in &scan.inputs {
            let Some(mcs) = bench.mcs(&input.mcs) else {
                eyre::bail!(
                    "scan.inputs: '{}' refers to unknown mcs '{}'",
                    input.name,
                    input.mcs
                );
            };
            if input.channel >= mcs.channels.len() {
                eyre::bail!(
                    "scan.inputs: '{}' channel {} out of range for '{}'",
                    input.name,
                    input.channel,
                    mcs.name
                );
            }
        }
        if let Some(timer) = &bench.timer
            && bench.mcs(timer).is_none()
        {
            eyre::bail!("bench.timer: unknown mcs '{timer}'");
        }
        Ok(())
    }
}
