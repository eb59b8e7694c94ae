//! Simulated device rig assembled from the `[bench]` config section.

use std::sync::Arc;

use eyre::{Result, WrapErr};
use qscan_config::{BenchCfg, ChannelCfg, EncoderKindCfg, MeasurementCfg, ScanCfg};
use qscan_core::hw_error::map_port_error;
use qscan_core::{ClockSource, ScalerInput, ScanDevices, ScanError};
use qscan_hardware::{
    BinTiming, LinearPseudo, MotorParams, SimChannel, SimEncoder, SimMcs, SimMotor,
    SimPulseGenerator,
};
use qscan_traits::clock::test_clock::TestClock;
use qscan_traits::{
    AcquisitionPort, Clock, EncoderPort, EncoderType, MonotonicClock, MotorPort, PortError,
    PulseGenerator,
};

type SharedClock = Arc<dyn Clock + Send + Sync>;

fn encoder_type(kind: EncoderKindCfg) -> EncoderType {
    match kind {
        EncoderKindCfg::Absolute => EncoderType::Absolute,
        EncoderKindCfg::Incremental => EncoderType::Incremental,
        EncoderKindCfg::Delta => EncoderType::Delta,
    }
}

fn config_err(msg: String) -> eyre::Report {
    eyre::Report::new(ScanError::Configuration(msg))
}

fn port<T>(res: std::result::Result<T, PortError>, device: &str) -> Result<T> {
    res.map_err(|e| eyre::Report::new(map_port_error(&*e)))
        .wrap_err_with(|| format!("device '{device}' did not answer"))
}

/// What `Bench::self_check` found.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckSummary {
    pub motors: Vec<(String, f64)>,
    pub scalers: usize,
    pub encoders: usize,
    pub pulse_generator: bool,
}

/// Owns every simulated device for the lifetime of the process.
pub struct Bench {
    clock: SharedClock,
    motors: Vec<SimMotor>,
    mcs: Vec<SimMcs>,
    encoders: Vec<SimEncoder>,
    pulse_generator: Option<SimPulseGenerator>,
    timer: Option<String>,
}

impl Bench {
    pub fn build(cfg: &BenchCfg) -> Result<Self> {
        let clock: SharedClock = if cfg.virtual_time {
            Arc::new(TestClock::new())
        } else {
            Arc::new(MonotonicClock::new())
        };
        let timing = BinTiming::new();

        // Real motors first so pseudomotors can share their axis.
        let mut motors: Vec<SimMotor> = cfg
            .motors
            .iter()
            .filter(|m| m.pseudo.is_none())
            .map(|m| {
                SimMotor::new(&m.name, clock.clone(), m.position).with_params(MotorParams {
                    speed: m.speed,
                    base_speed: m.base_speed,
                    acceleration_time: m.acceleration_time,
                    scale: m.scale,
                    offset: m.offset,
                    backlash: m.backlash,
                })
            })
            .collect();
        for m in &cfg.motors {
            let Some(p) = &m.pseudo else { continue };
            let real = motors
                .iter()
                .find(|r| r.name() == p.real)
                .ok_or_else(|| config_err(format!("pseudomotor '{}' has no real motor '{}'", m.name, p.real)))?;
            let view = real.view(
                &m.name,
                Some(LinearPseudo {
                    real_name: p.real.clone(),
                    gain: p.gain,
                    bias: p.bias,
                }),
            );
            motors.push(view);
        }

        let mut encoders = Vec::new();
        for m in &cfg.motors {
            let Some(kind) = m.encoder else { continue };
            let Some(motor) = motors.iter().find(|s| s.name() == m.name) else { continue };
            encoders.push(SimEncoder::new(
                format!("{}_enc", m.name),
                encoder_type(kind),
                motor,
                timing.clone(),
                clock.clone(),
            ));
        }

        let mut mcs = Vec::with_capacity(cfg.mcs.len());
        for unit in &cfg.mcs {
            let mut channels = Vec::with_capacity(unit.channels.len());
            for ch in &unit.channels {
                channels.push(match ch {
                    ChannelCfg::Rate { rate } => SimChannel::Rate(*rate),
                    ChannelCfg::Peak {
                        motor,
                        center,
                        fwhm,
                        height,
                        background,
                    } => {
                        let axis = motors
                            .iter()
                            .find(|s| s.name() == motor.as_str())
                            .ok_or_else(|| {
                                config_err(format!("mcs '{}' peaks on unknown motor '{motor}'", unit.name))
                            })?
                            .axis()
                            .clone();
                        SimChannel::Peak {
                            axis,
                            center: *center,
                            fwhm: *fwhm,
                            height: *height,
                            background: *background,
                        }
                    }
                });
            }
            mcs.push(SimMcs::new(&unit.name, clock.clone(), timing.clone(), channels));
        }

        let pulse_generator = cfg
            .pulse_generator
            .as_ref()
            .map(|name| SimPulseGenerator::new(name, clock.clone(), timing.clone()));

        tracing::info!(
            motors = motors.len(),
            mcs = mcs.len(),
            encoders = encoders.len(),
            virtual_time = cfg.virtual_time,
            "bench assembled"
        );
        Ok(Self {
            clock,
            motors,
            mcs,
            encoders,
            pulse_generator,
            timer: cfg.timer.clone(),
        })
    }

    /// Timeline the devices live on; the engine must poll on the same one.
    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    /// Borrow the devices `scan` needs, with the axes in request order.
    pub fn devices(&mut self, scan: &ScanCfg) -> Result<ScanDevices<'_>> {
        let mcs_index = |name: &str| {
            self.mcs
                .iter()
                .position(|m| m.name() == name)
                .ok_or_else(|| config_err(format!("unknown mcs '{name}'")))
        };
        let mut inputs = Vec::with_capacity(scan.inputs.len());
        for input in &scan.inputs {
            inputs.push(
                ScalerInput::new(&input.name, mcs_index(&input.mcs)?, input.channel)
                    .with_dark_current(input.dark_current),
            );
        }
        let timer = match (&self.timer, scan.inputs.first()) {
            (Some(name), _) => Some(mcs_index(name)?),
            (None, Some(first)) => Some(mcs_index(&first.mcs)?),
            (None, None) => None,
        };

        let mut slots: Vec<Option<&mut dyn MotorPort>> = scan.axes.iter().map(|_| None).collect();
        let mut alternates: Vec<&dyn MotorPort> = Vec::new();
        for m in &mut self.motors {
            if let Some(i) = scan.axes.iter().position(|a| a.motor == m.name()) {
                slots[i] = Some(m);
            } else if scan
                .alternate
                .datafile
                .iter()
                .chain(&scan.alternate.plot)
                .any(|a| a == m.name())
            {
                alternates.push(&*m);
            }
        }
        let motors = slots
            .into_iter()
            .zip(&scan.axes)
            .map(|(slot, axis)| {
                slot.ok_or_else(|| config_err(format!("motor '{}' is not on the bench", axis.motor)))
            })
            .collect::<Result<Vec<_>>>()?;

        let clock = match scan.measurement {
            MeasurementCfg::PresetTime => timer.map(|mcs| ClockSource::InternalTimer { mcs }),
            MeasurementCfg::PresetPulsePeriod => self
                .pulse_generator
                .as_mut()
                .map(|pg| ClockSource::PulseGenerator(pg)),
            MeasurementCfg::PresetCount => None,
        };

        Ok(ScanDevices {
            motors,
            mcs: self.mcs.iter_mut().map(|m| m as &mut dyn AcquisitionPort).collect(),
            inputs,
            clock,
            encoders: self.encoders.iter_mut().map(|e| e as &mut dyn EncoderPort).collect(),
            alternates,
        })
    }

    /// Ask every device one harmless question.
    pub fn self_check(&mut self) -> Result<CheckSummary> {
        let mut motors = Vec::with_capacity(self.motors.len());
        for m in &mut self.motors {
            let pos = port(m.position(), m.name())?;
            port(m.is_busy(), m.name())?;
            motors.push((m.name().to_string(), pos));
        }
        for m in &mut self.mcs {
            port(m.is_busy(), m.name())?;
        }
        for e in &mut self.encoders {
            port(e.current_count(), e.name())?;
        }
        if let Some(pg) = &mut self.pulse_generator {
            port(pg.is_busy(), pg.name())?;
        }
        Ok(CheckSummary {
            motors,
            scalers: self.mcs.len(),
            encoders: self.encoders.len(),
            pulse_generator: self.pulse_generator.is_some(),
        })
    }
}
