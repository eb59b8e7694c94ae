use std::time::Instant;

use qscan_traits::{PortError, PulseGenerator};

use super::{BinTiming, Faults, SharedClock};
use crate::error::HwError;

/// Pulse train source. The first pulse opens bin 0, so `n` pulses clock
/// `n - 1` bins on the shared timing.
pub struct SimPulseGenerator {
    name: String,
    clock: SharedClock,
    timing: BinTiming,
    period: f64,
    width: f64,
    pulses: usize,
    started_at: Option<Instant>,
    stopped: bool,
    faults: Faults,
    starts: usize,
    stops: usize,
}

impl SimPulseGenerator {
    pub fn new(name: impl Into<String>, clock: SharedClock, timing: BinTiming) -> Self {
        Self {
            name: name.into(),
            clock,
            timing,
            period: 0.0,
            width: 0.0,
            pulses: 0,
            started_at: None,
            stopped: false,
            faults: Faults::default(),
            starts: 0,
            stops: 0,
        }
    }

    pub fn faults(&self) -> Faults {
        self.faults.clone()
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn num_pulses(&self) -> usize {
        self.pulses
    }

    pub fn start_count(&self) -> usize {
        self.starts
    }

    pub fn stop_count(&self) -> usize {
        self.stops
    }
}

impl PulseGenerator for SimPulseGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_pulse_period(&mut self, seconds: f64) -> Result<(), PortError> {
        self.faults.check(&self.name, "set_pulse_period")?;
        self.period = seconds;
        Ok(())
    }

    fn set_pulse_width(&mut self, seconds: f64) -> Result<(), PortError> {
        self.faults.check(&self.name, "set_pulse_width")?;
        self.width = seconds;
        Ok(())
    }

    fn set_num_pulses(&mut self, n: usize) -> Result<(), PortError> {
        self.faults.check(&self.name, "set_num_pulses")?;
        self.pulses = n;
        Ok(())
    }

    fn start(&mut self) -> Result<(), PortError> {
        self.faults.check(&self.name, "start")?;
        if self.period <= 0.0 {
            return Err(HwError::InvalidArgument(format!(
                "{}: pulse period {} must be positive",
                self.name, self.period
            ))
            .into());
        }
        let now = self.clock.now();
        self.timing
            .begin(now, self.period, self.pulses.saturating_sub(1));
        self.started_at = Some(now);
        self.stopped = false;
        self.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PortError> {
        self.faults.check(&self.name, "stop")?;
        if self.started_at.is_some() && !self.stopped {
            self.timing.halt(self.clock.now());
        }
        self.stopped = true;
        self.stops += 1;
        Ok(())
    }

    fn is_busy(&mut self) -> Result<bool, PortError> {
        self.faults.check(&self.name, "is_busy")?;
        let Some(t0) = self.started_at else {
            return Ok(false);
        };
        if self.stopped {
            return Ok(false);
        }
        #[allow(clippy::cast_precision_loss)]
        let train = self.period * self.pulses as f64;
        Ok(self.clock.secs_since(t0) + 1e-9 < train)
    }
}
