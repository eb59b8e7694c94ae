//! The set of borrowed ports one scan drives.

use qscan_traits::{AcquisitionPort, EncoderPort, MotorPort, PulseGenerator};

/// One logical counter input: a channel of an MCS.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalerInput {
    pub name: String,
    /// Index into `ScanDevices::mcs`.
    pub mcs: usize,
    pub channel: usize,
    /// Counts per second subtracted from every bin.
    pub dark_current: f64,
}

impl ScalerInput {
    pub fn new(name: impl Into<String>, mcs: usize, channel: usize) -> Self {
        Self {
            name: name.into(),
            mcs,
            channel,
            dark_current: 0.0,
        }
    }

    #[must_use]
    pub fn with_dark_current(mut self, counts_per_sec: f64) -> Self {
        self.dark_current = counts_per_sec;
        self
    }
}

/// What advances the MCS bins.
pub enum ClockSource<'a> {
    /// The internal timer of the MCS at this index.
    InternalTimer { mcs: usize },
    PulseGenerator(&'a mut dyn PulseGenerator),
}

impl ClockSource<'_> {
    pub fn label(&self) -> &str {
        match self {
            Self::InternalTimer { .. } => "internal timer",
            Self::PulseGenerator(pg) => pg.name(),
        }
    }
}

/// Ports resolved once at scan start and borrowed for the scan's lifetime.
///
/// `motors` must list the scan axes in request order. MCS units are
/// addressed by index, so several inputs may share one device and it is
/// still armed, started and stopped exactly once.
#[derive(Default)]
pub struct ScanDevices<'a> {
    pub motors: Vec<&'a mut dyn MotorPort>,
    pub mcs: Vec<&'a mut dyn AcquisitionPort>,
    pub inputs: Vec<ScalerInput>,
    pub clock: Option<ClockSource<'a>>,
    /// Pool of encoder channels; bound to axes fresh at every scan.
    pub encoders: Vec<&'a mut dyn EncoderPort>,
    /// Non-axis motors that may be logged as alternate X positions.
    pub alternates: Vec<&'a dyn MotorPort>,
}

impl<'a> ScanDevices<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_motor(mut self, m: &'a mut dyn MotorPort) -> Self {
        self.motors.push(m);
        self
    }

    #[must_use]
    pub fn with_mcs(mut self, m: &'a mut dyn AcquisitionPort) -> Self {
        self.mcs.push(m);
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: ScalerInput) -> Self {
        self.inputs.push(input);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: ClockSource<'a>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, e: &'a mut dyn EncoderPort) -> Self {
        self.encoders.push(e);
        self
    }

    #[must_use]
    pub fn with_alternate(mut self, m: &'a dyn MotorPort) -> Self {
        self.alternates.push(m);
        self
    }
}
