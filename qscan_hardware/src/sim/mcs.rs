use std::time::Instant;

use qscan_traits::{AcquisitionPort, McsMode, PortError};

use super::{BinTiming, Faults, SharedClock, SimAxis};
use crate::error::HwError;

/// Count-rate model of one scaler channel, in counts per second.
#[derive(Debug, Clone)]
pub enum SimChannel {
    Rate(f64),
    /// Gaussian peak over the real position of `axis` at each bin midpoint.
    Peak {
        axis: SimAxis,
        center: f64,
        fwhm: f64,
        height: f64,
        background: f64,
    },
}

impl SimChannel {
    fn rate(&self, at: Instant) -> f64 {
        match self {
            Self::Rate(r) => *r,
            Self::Peak {
                axis,
                center,
                fwhm,
                height,
                background,
            } => {
                let sigma = fwhm / 2.354_820_045;
                if sigma <= 0.0 {
                    return *background;
                }
                let x = (axis.position_at(at) - center) / sigma;
                background + height * (-0.5 * x * x).exp()
            }
        }
    }
}

/// Simulated multichannel scaler.
pub struct SimMcs {
    name: String,
    clock: SharedClock,
    timing: BinTiming,
    channels: Vec<SimChannel>,
    mode: McsMode,
    measurement_time: f64,
    num_measurements: usize,
    external_advance: bool,
    prescale: u32,
    armed: bool,
    stopped_at: Option<Instant>,
    faults: Faults,
    starts: usize,
    stops: usize,
    clears: usize,
}

impl SimMcs {
    pub fn new(
        name: impl Into<String>,
        clock: SharedClock,
        timing: BinTiming,
        channels: Vec<SimChannel>,
    ) -> Self {
        Self {
            name: name.into(),
            clock,
            timing,
            channels,
            mode: McsMode::PresetTime,
            measurement_time: 0.0,
            num_measurements: 0,
            external_advance: false,
            prescale: 1,
            armed: false,
            stopped_at: None,
            faults: Faults::default(),
            starts: 0,
            stops: 0,
            clears: 0,
        }
    }

    pub fn faults(&self) -> Faults {
        self.faults.clone()
    }

    pub fn timing(&self) -> &BinTiming {
        &self.timing
    }

    pub fn num_measurements(&self) -> usize {
        self.num_measurements
    }

    pub fn measurement_time(&self) -> f64 {
        self.measurement_time
    }

    pub fn external_advance(&self) -> bool {
        self.external_advance
    }

    pub fn prescale(&self) -> u32 {
        self.prescale
    }

    pub fn start_count(&self) -> usize {
        self.starts
    }

    pub fn stop_count(&self) -> usize {
        self.stops
    }

    pub fn clear_count(&self) -> usize {
        self.clears
    }

    /// True while armed and still accumulating bins.
    pub fn is_counting(&self) -> bool {
        if !self.armed || self.stopped_at.is_some() {
            return false;
        }
        self.timing.started_at().is_none()
            || self.timing.completed_bins(self.clock.now()) < self.num_measurements
    }

    fn completed(&self) -> usize {
        let now = self.clock.now();
        let at = self.stopped_at.map_or(now, |s| s.min(now));
        self.timing.completed_bins(at).min(self.num_measurements)
    }
}

impl AcquisitionPort for SimMcs {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_mode(&mut self, mode: McsMode) -> Result<(), PortError> {
        self.faults.check(&self.name, "set_mode")?;
        self.mode = mode;
        Ok(())
    }

    fn set_measurement_time(&mut self, seconds: f64) -> Result<(), PortError> {
        self.faults.check(&self.name, "set_measurement_time")?;
        self.measurement_time = seconds;
        Ok(())
    }

    fn set_num_measurements(&mut self, n: usize) -> Result<(), PortError> {
        self.faults.check(&self.name, "set_num_measurements")?;
        self.num_measurements = n;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), PortError> {
        self.faults.check(&self.name, "clear")?;
        self.armed = false;
        self.stopped_at = None;
        if !self.timing.is_running(self.clock.now()) {
            self.timing.reset();
        }
        self.clears += 1;
        Ok(())
    }

    fn start(&mut self) -> Result<(), PortError> {
        self.faults.check(&self.name, "start")?;
        if self.mode == McsMode::PresetCount {
            return Err(HwError::InvalidArgument(format!(
                "{}: preset-count mode is not simulated",
                self.name
            ))
            .into());
        }
        let now = self.clock.now();
        if !self.external_advance && !self.timing.is_running(now) {
            self.timing
                .begin(now, self.measurement_time, self.num_measurements);
        }
        self.armed = true;
        self.stopped_at = None;
        self.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PortError> {
        self.faults.check(&self.name, "stop")?;
        let now = self.clock.now();
        if self.armed && self.stopped_at.is_none() {
            self.stopped_at = Some(now);
            if !self.external_advance {
                self.timing.halt(now);
            }
        }
        self.stops += 1;
        Ok(())
    }

    fn is_busy(&mut self) -> Result<bool, PortError> {
        self.faults.check(&self.name, "is_busy")?;
        Ok(self.is_counting())
    }

    fn set_external_channel_advance(&mut self, enabled: bool) -> Result<(), PortError> {
        self.faults
            .check(&self.name, "set_external_channel_advance")?;
        self.external_advance = enabled;
        Ok(())
    }

    fn set_external_prescale(&mut self, prescale: u32) -> Result<(), PortError> {
        self.faults.check(&self.name, "set_external_prescale")?;
        self.prescale = prescale;
        Ok(())
    }

    fn read_scaler(&mut self, channel: usize) -> Result<Vec<i64>, PortError> {
        self.faults.check(&self.name, "read_scaler")?;
        let source = self.channels.get(channel).ok_or_else(|| {
            HwError::InvalidArgument(format!("{}: no channel {channel}", self.name))
        })?;
        let period = self.timing.period();
        let counts = (0..self.completed())
            .filter_map(|i| self.timing.bin_bounds(i))
            .map(|(start, end)| {
                let mid = start + (end - start) / 2;
                #[allow(clippy::cast_possible_truncation)]
                let c = (source.rate(mid) * period).round() as i64;
                c.max(0)
            })
            .collect();
        Ok(counts)
    }
}
