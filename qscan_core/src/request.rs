//! What to scan: axes, sample grid and measurement kind.

use std::collections::HashSet;
use std::marker::PhantomData;

use crate::error::{BuildError, Result};

/// How each bin is paced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementKind {
    /// MCS internal timer, `seconds` per bin.
    PresetTime { seconds: f64 },
    /// External pulse generator with the given period.
    PresetPulsePeriod { seconds: f64 },
    /// Bin closes after a number of monitor counts. Not schedulable on a
    /// fixed grid, so quick scans reject it.
    PresetCount { counts: u64 },
}

impl MeasurementKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PresetTime { .. } => "preset time",
            Self::PresetPulsePeriod { .. } => "preset pulse period",
            Self::PresetCount { .. } => "preset count",
        }
    }

    /// Seconds per bin, for the time-based kinds.
    pub fn seconds(&self) -> Option<f64> {
        match *self {
            Self::PresetTime { seconds } | Self::PresetPulsePeriod { seconds } => Some(seconds),
            Self::PresetCount { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AxisRequest {
    pub motor: String,
    pub start: f64,
    pub end: f64,
}

impl AxisRequest {
    pub fn new(motor: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            motor: motor.into(),
            start,
            end,
        }
    }
}

/// Where an alternate X motor's positions are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlternateRole {
    Datafile,
    Plot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlternateMotor {
    pub motor: String,
    pub role: AlternateRole,
}

/// Immutable description of one quick scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    axes: Vec<AxisRequest>,
    num_measurements: usize,
    measurement: MeasurementKind,
    alternates: Vec<AlternateMotor>,
}

impl ScanRequest {
    pub fn builder() -> ScanRequestBuilder<Missing> {
        ScanRequestBuilder::default()
    }

    pub fn axes(&self) -> &[AxisRequest] {
        &self.axes
    }

    pub fn num_measurements(&self) -> usize {
        self.num_measurements
    }

    pub fn measurement(&self) -> MeasurementKind {
        self.measurement
    }

    pub fn alternates(&self) -> &[AlternateMotor] {
        &self.alternates
    }

    pub fn alternates_for(&self, role: AlternateRole) -> impl Iterator<Item = &AlternateMotor> {
        self.alternates.iter().filter(move |a| a.role == role)
    }
}

pub struct Missing;
pub struct Set;

/// Builder for `ScanRequest`; `build()` is only available once a
/// measurement kind is set.
pub struct ScanRequestBuilder<M> {
    axes: Vec<AxisRequest>,
    num_measurements: usize,
    measurement: Option<MeasurementKind>,
    alternates: Vec<AlternateMotor>,
    _m: PhantomData<M>,
}

impl Default for ScanRequestBuilder<Missing> {
    fn default() -> Self {
        Self {
            axes: Vec::new(),
            num_measurements: 0,
            measurement: None,
            alternates: Vec::new(),
            _m: PhantomData,
        }
    }
}

impl<M> ScanRequestBuilder<M> {
    #[must_use]
    pub fn axis(mut self, axis: AxisRequest) -> Self {
        self.axes.push(axis);
        self
    }

    #[must_use]
    pub fn num_measurements(mut self, n: usize) -> Self {
        self.num_measurements = n;
        self
    }

    #[must_use]
    pub fn alternate(mut self, motor: impl Into<String>, role: AlternateRole) -> Self {
        self.alternates.push(AlternateMotor {
            motor: motor.into(),
            role,
        });
        self
    }

    pub fn measurement(self, kind: MeasurementKind) -> ScanRequestBuilder<Set> {
        ScanRequestBuilder {
            axes: self.axes,
            num_measurements: self.num_measurements,
            measurement: Some(kind),
            alternates: self.alternates,
            _m: PhantomData,
        }
    }
}

impl ScanRequestBuilder<Set> {
    pub fn build(self) -> Result<ScanRequest> {
        let measurement = self
            .measurement
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMeasurement))?;
        if self.axes.is_empty() {
            return Err(eyre::Report::new(BuildError::NoAxes));
        }
        if self.num_measurements < 2 {
            return Err(eyre::Report::new(BuildError::InvalidRequest(
                "num_measurements must be >= 2",
            )));
        }
        let mut seen = HashSet::new();
        for a in &self.axes {
            if !seen.insert(a.motor.as_str()) {
                return Err(eyre::Report::new(BuildError::DuplicateMotor(
                    a.motor.clone(),
                )));
            }
            if !(a.start.is_finite() && a.end.is_finite()) {
                return Err(eyre::Report::new(BuildError::InvalidRequest(
                    "axis start/end must be finite",
                )));
            }
        }
        match measurement {
            MeasurementKind::PresetTime { seconds } | MeasurementKind::PresetPulsePeriod { seconds }
                if !(seconds.is_finite() && seconds > 0.0) =>
            {
                return Err(eyre::Report::new(BuildError::InvalidRequest(
                    "measurement time must be > 0",
                )));
            }
            MeasurementKind::PresetCount { counts: 0 } => {
                return Err(eyre::Report::new(BuildError::InvalidRequest(
                    "preset count must be >= 1",
                )));
            }
            _ => {}
        }
        Ok(ScanRequest {
            axes: self.axes,
            num_measurements: self.num_measurements,
            measurement,
            alternates: self.alternates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ScanRequestBuilder<Set> {
        ScanRequest::builder()
            .axis(AxisRequest::new("m1", 0.0, 1.0))
            .num_measurements(10)
            .measurement(MeasurementKind::PresetTime { seconds: 0.1 })
    }

    #[test]
    fn builds_valid_request() {
        let r = base()
            .alternate("energy", AlternateRole::Datafile)
            .build()
            .expect("valid");
        assert_eq!(r.axes().len(), 1);
        assert_eq!(r.measurement().seconds(), Some(0.1));
        assert_eq!(r.alternates_for(AlternateRole::Datafile).count(), 1);
        assert_eq!(r.alternates_for(AlternateRole::Plot).count(), 0);
    }

    #[test]
    fn rejects_duplicates_and_bad_counts() {
        let e = base()
            .axis(AxisRequest::new("m1", 2.0, 3.0))
            .build()
            .expect_err("duplicate");
        assert_eq!(
            e.downcast_ref::<BuildError>(),
            Some(&BuildError::DuplicateMotor("m1".into()))
        );
        let e = base().num_measurements(1).build().expect_err("too few");
        assert!(matches!(
            e.downcast_ref::<BuildError>(),
            Some(BuildError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rejects_nonpositive_measurement_time() {
        let e = ScanRequest::builder()
            .axis(AxisRequest::new("m1", 0.0, 1.0))
            .num_measurements(10)
            .measurement(MeasurementKind::PresetPulsePeriod { seconds: 0.0 })
            .build()
            .expect_err("zero period");
        assert!(e.to_string().contains("measurement time"));
    }
}
