//! The quick-scan state machine: plan, position, arm, run, drain, persist.

use std::fmt;
use std::sync::Arc;

use eyre::WrapErr;
use qscan_traits::{AcquisitionPort, Clock, DataSink, EncoderPort, MonotonicClock, MotorPort, WaitMode};

use crate::acquisition;
use crate::config::EngineCfg;
use crate::control::{ScanContext, ScanControl};
use crate::devices::{ClockSource, ScalerInput, ScanDevices};
use crate::error::{Result, ScanError};
use crate::hw_error::PortResultExt;
use crate::motion;
use crate::planner::{self, AcquisitionPlan, MotionProfile, SpeedOverrideGuard};
use crate::reconstruct::{self, AxisPositions, EncoderBinding, PositionSource, ResolvedAlternate};
use crate::request::{AlternateRole, ScanRequest};

/// Lifecycle states. `Aborting` may follow any other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Planning,
    MovingToStart,
    CorrectingBacklash,
    MovingToExtendedStart,
    Arming,
    RunningBody,
    Draining,
    Persisting,
    Aborting,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::MovingToStart => "moving to start",
            Self::CorrectingBacklash => "correcting backlash",
            Self::MovingToExtendedStart => "moving to extended start",
            Self::Arming => "arming",
            Self::RunningBody => "running body",
            Self::Draining => "draining",
            Self::Persisting => "persisting",
            Self::Aborting => "aborting",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct StateTracker {
    current: ScanState,
    history: Vec<ScanState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            current: ScanState::Idle,
            history: Vec::new(),
        }
    }
}

impl StateTracker {
    fn enter(&mut self, next: ScanState) {
        tracing::debug!(from = %self.current, to = %next, "scan state");
        self.current = next;
        self.history.push(next);
    }

    fn restart(&mut self) {
        self.current = ScanState::Idle;
        self.history.clear();
    }
}

/// Summary of a finished scan.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub plan: AcquisitionPlan,
    pub profiles: Vec<MotionProfile>,
    /// Where each axis' positions came from, in axis order.
    pub sources: Vec<(String, PositionSource)>,
    pub samples_written: usize,
    /// States visited, in order, ending with `Idle`.
    pub states: Vec<ScanState>,
}

/// Drives one quick scan at a time over borrowed devices.
pub struct QuickScan {
    cfg: EngineCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    control: ScanControl,
    tracker: StateTracker,
}

impl fmt::Debug for QuickScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuickScan")
            .field("cfg", &self.cfg)
            .field("control", &self.control)
            .field("state", &self.tracker.current)
            .finish_non_exhaustive()
    }
}

impl QuickScan {
    pub fn new(cfg: EngineCfg) -> Self {
        Self {
            cfg,
            clock: Arc::new(MonotonicClock::new()),
            control: ScanControl::default(),
            tracker: StateTracker::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_control(mut self, control: ScanControl) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> &ScanControl {
        &self.control
    }

    pub fn state(&self) -> ScanState {
        self.tracker.current
    }

    /// States visited by the last `run` or `plan_only`.
    pub fn history(&self) -> &[ScanState] {
        &self.tracker.history
    }

    /// Plan without moving anything. Motor speeds are left as found.
    pub fn plan_only(
        &mut self,
        request: &ScanRequest,
        devices: &mut ScanDevices<'_>,
    ) -> Result<(AcquisitionPlan, Vec<MotionProfile>)> {
        self.tracker.restart();
        self.tracker.enter(ScanState::Planning);
        let res = planner::plan(request, devices, &self.cfg.acquisition);
        self.tracker.enter(ScanState::Idle);
        res
    }

    /// Run one scan and hand every captured sample to `sink`.
    ///
    /// Errors after the body has started still persist the samples that
    /// were captured before the error is returned.
    pub fn run(
        &mut self,
        request: &ScanRequest,
        devices: &mut ScanDevices<'_>,
        sink: &mut dyn DataSink,
    ) -> Result<ScanReport> {
        self.tracker.restart();
        let ctx = ScanContext {
            clock: &*self.clock,
            control: &self.control,
            cfg: &self.cfg,
        };
        let res = execute(&ctx, &mut self.tracker, request, devices, sink);
        self.tracker.enter(ScanState::Idle);
        match res {
            Ok((plan, profiles, sources, samples_written)) => {
                tracing::info!(samples = samples_written, "quick scan complete");
                Ok(ScanReport {
                    plan,
                    profiles,
                    sources,
                    samples_written,
                    states: self.tracker.history.clone(),
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "quick scan failed");
                Err(e)
            }
        }
    }
}

type Outcome = (AcquisitionPlan, Vec<MotionProfile>, Vec<(String, PositionSource)>, usize);

fn execute(
    ctx: &ScanContext<'_>,
    tracker: &mut StateTracker,
    request: &ScanRequest,
    devices: &mut ScanDevices<'_>,
    sink: &mut dyn DataSink,
) -> Result<Outcome> {
    tracker.enter(ScanState::Planning);
    ctx.control.check_interrupt()?;
    let (plan, profiles) = planner::plan(request, devices, &ctx.cfg.acquisition)?;
    let bindings = reconstruct::bind_encoders(&devices.motors, &mut devices.encoders);
    let alternates = reconstruct::resolve_alternates(
        request,
        &devices.alternates,
        &devices.motors,
        &bindings,
    )?;
    for p in &profiles {
        tracing::info!(
            motor = %p.motor,
            start = p.start,
            end = p.end,
            "motor '{}' will scan from {} to {}",
            p.motor,
            p.start,
            p.end
        );
    }
    tracing::info!(
        requested = plan.requested_num_measurements,
        actual = plan.actual_num_measurements,
        measurement_time = plan.measurement_time,
        estimated_s = plan.estimated_duration,
        "quick scan planned"
    );

    let ScanDevices {
        motors,
        mcs,
        inputs,
        clock,
        encoders,
        alternates: alternate_motors,
    } = devices;
    let clock = clock.as_mut().ok_or_else(|| {
        eyre::Report::new(ScanError::NoClockAvailable(plan.measurement.label()))
    })?;

    if let Err(e) = prepare(ctx, tracker, motors, mcs, clock, &plan, &profiles) {
        abort(tracker, motors, mcs, clock, &plan);
        return Err(e);
    }

    tracker.enter(ScanState::RunningBody);
    let body = run_body(ctx, tracker, motors, mcs, clock, &plan, &profiles);
    if body.is_err() {
        abort(tracker, motors, mcs, clock, &plan);
    }

    tracker.enter(ScanState::Persisting);
    let written = persist(
        &plan,
        &profiles,
        &Readout {
            motors,
            inputs,
            bindings: &bindings,
            alternates: &alternates,
            alternate_motors,
        },
        mcs,
        encoders,
        sink,
        body.is_ok(),
    );
    // The body error keeps its classification; a persistence failure on
    // top of it is logged and attached as context.
    if let Err(e) = body {
        return Err(match written {
            Ok(_) => e,
            Err(persist_err) => {
                tracing::error!(error = %format!("{persist_err:#}"), "partial data not persisted");
                e.wrap_err(format!("partial data not persisted: {persist_err:#}"))
            }
        });
    }
    let (samples, sources) = written?;
    Ok((plan, profiles, sources, samples))
}

/// Setup moves and arming.
fn prepare(
    ctx: &ScanContext<'_>,
    tracker: &mut StateTracker,
    motors: &mut [&mut dyn MotorPort],
    mcs: &mut [&mut dyn AcquisitionPort],
    clock: &mut ClockSource<'_>,
    plan: &AcquisitionPlan,
    profiles: &[MotionProfile],
) -> Result<()> {
    tracker.enter(ScanState::MovingToStart);
    let starts: Vec<f64> = profiles.iter().map(|p| p.start).collect();
    motion::move_and_wait(motors, &starts, WaitMode::NoWait, ctx)
        .wrap_err("moving to scan start")?;

    if plan.backlash_correction {
        tracker.enter(ScanState::CorrectingBacklash);
        let backlash: Vec<f64> = profiles.iter().map(|p| p.backlash_position).collect();
        motion::move_and_wait(motors, &backlash, WaitMode::NoWait, ctx)
            .wrap_err("backlash correction")?;
    }

    tracker.enter(ScanState::MovingToExtendedStart);
    let extended: Vec<f64> = profiles.iter().map(|p| p.extended_start).collect();
    motion::move_and_wait(motors, &extended, WaitMode::NoWaitIgnoreBacklash, ctx)
        .wrap_err("moving to extended start")?;

    tracker.enter(ScanState::Arming);
    acquisition::arm(mcs, clock, plan)
}

/// Counting and the synchronized move, with speeds restored on every path.
fn run_body(
    ctx: &ScanContext<'_>,
    tracker: &mut StateTracker,
    motors: &mut [&mut dyn MotorPort],
    mcs: &mut [&mut dyn AcquisitionPort],
    clock: &mut ClockSource<'_>,
    plan: &AcquisitionPlan,
    profiles: &[MotionProfile],
) -> Result<()> {
    let ranges: Vec<(f64, f64)> = profiles.iter().map(|p| (p.start, p.end)).collect();
    let ends: Vec<f64> = profiles.iter().map(|p| p.extended_end).collect();
    let mut guard = SpeedOverrideGuard::apply(motors, &ranges, plan.body_time)?;

    acquisition::start_body(mcs, clock, plan, ctx)?;
    if let Err(e) = motion::start_move(guard.motors(), &ends, WaitMode::NoWaitIgnoreBacklash) {
        acquisition::stop_acquisition(mcs, clock, &plan.ports);
        return Err(e.wrap_err("starting the scan body move"));
    }
    acquisition::wait_for_completion(guard.motors(), mcs, clock, plan, ctx)?;

    tracker.enter(ScanState::Draining);
    motion::wait_for_stop(guard.motors(), ctx).wrap_err("waiting for motors to stop")?;
    guard.restore()
}

fn abort(
    tracker: &mut StateTracker,
    motors: &mut [&mut dyn MotorPort],
    mcs: &mut [&mut dyn AcquisitionPort],
    clock: &mut ClockSource<'_>,
    plan: &AcquisitionPlan,
) {
    tracker.enter(ScanState::Aborting);
    tracing::warn!("stopping all motors and scalers");
    motion::stop_all(motors);
    acquisition::stop_acquisition(mcs, clock, &plan.ports);
}

// ── Persistence ──────────────────────────────────────────────────────────────

struct Readout<'r, 'a> {
    motors: &'r [&'a mut dyn MotorPort],
    inputs: &'r [ScalerInput],
    bindings: &'r [EncoderBinding],
    alternates: &'r [ResolvedAlternate],
    alternate_motors: &'r [&'a dyn MotorPort],
}

/// Read every scaler input, zero-filling channels that cannot be read, and
/// subtract dark current. Returns the counts and the number of bins every
/// readable channel holds.
fn read_counts(
    mcs: &mut [&mut dyn AcquisitionPort],
    inputs: &[ScalerInput],
    plan: &AcquisitionPlan,
) -> (Vec<Vec<i64>>, Option<usize>) {
    let n = plan.actual_num_measurements;
    let mut captured: Option<usize> = None;
    let mut counts = Vec::with_capacity(inputs.len());
    for input in inputs {
        let Some(port) = mcs.get_mut(input.mcs) else {
            tracing::warn!(input = %input.name, mcs = input.mcs, "scaler not found; zero-filling");
            counts.push(vec![0; n]);
            continue;
        };
        let mut values = match port.read_scaler(input.channel) {
            Ok(v) => v,
            Err(e) => {
                let err = ScanError::HardwareReadback(format!("{}: {e}", port.name()));
                tracing::warn!(input = %input.name, error = %err, "scaler readout failed; zero-filling");
                counts.push(vec![0; n]);
                continue;
            }
        };
        if values.len() != n {
            tracing::debug!(input = %input.name, captured = values.len(), expected = n, "partial scaler data");
        }
        captured = Some(captured.map_or(values.len(), |c| c.min(values.len())));
        values.resize(n, 0);
        #[allow(clippy::cast_possible_truncation)]
        let dark = (input.dark_current * plan.measurement_time).round() as i64;
        if dark != 0 {
            for v in &mut values {
                *v -= dark;
            }
        }
        counts.push(values);
    }
    (counts, captured)
}

fn persist(
    plan: &AcquisitionPlan,
    profiles: &[MotionProfile],
    readout: &Readout<'_, '_>,
    mcs: &mut [&mut dyn AcquisitionPort],
    encoders: &mut [&mut dyn EncoderPort],
    sink: &mut dyn DataSink,
    completed: bool,
) -> Result<(usize, Vec<(String, PositionSource)>)> {
    let n = plan.actual_num_measurements;
    let (counts, captured) = read_counts(mcs, readout.inputs, plan);
    let rows = if completed {
        n
    } else {
        captured.unwrap_or(0).min(n)
    };

    let mut axes: Vec<AxisPositions> = Vec::with_capacity(profiles.len());
    for (i, (m, profile)) in readout.motors.iter().zip(profiles).enumerate() {
        let mut encoder = None;
        if let Some(b) = readout.bindings.iter().find(|b| b.axis == i)
            && let Some(e) = encoders.get_mut(b.encoder)
        {
            let e: &mut dyn EncoderPort = &mut **e;
            encoder = Some((e, b));
        }
        let positions = reconstruct::reconstruct_axis(&**m, profile, plan, encoder)
            .wrap_err_with(|| format!("reconstructing positions of '{}'", m.name()))?;
        axes.push(positions);
    }

    let datafile = columns(readout, &axes, AlternateRole::Datafile)?;
    let plot = columns(readout, &axes, AlternateRole::Plot)?;

    let mut positions = Vec::with_capacity(datafile.len().max(plot.len()));
    let mut row_counts = Vec::with_capacity(counts.len());
    for row in 0..rows {
        row_counts.clear();
        row_counts.extend(counts.iter().map(|c| c[row]));
        positions.clear();
        positions.extend(datafile.iter().map(|c| c[row]));
        sink.append_row(&positions, &row_counts)
            .port_err()
            .wrap_err_with(|| format!("writing sample {row}"))?;
        positions.clear();
        positions.extend(plot.iter().map(|c| c[row]));
        sink.append_plot_row(&positions, &row_counts)
            .port_err()
            .wrap_err_with(|| format!("writing plot sample {row}"))?;
    }
    sink.finish().port_err().wrap_err("finishing data output")?;
    if rows < n {
        tracing::warn!(written = rows, planned = n, "partial scan data persisted");
    }

    let sources = profiles
        .iter()
        .zip(&axes)
        .map(|(p, a)| (p.motor.clone(), a.source))
        .collect();
    Ok((rows, sources))
}

/// Position columns for one output: the alternates with `role` if any,
/// otherwise the scan axes.
fn columns(
    readout: &Readout<'_, '_>,
    axes: &[AxisPositions],
    role: AlternateRole,
) -> Result<Vec<Vec<f64>>> {
    let chosen: Vec<&ResolvedAlternate> =
        readout.alternates.iter().filter(|a| a.role == role).collect();
    if chosen.is_empty() {
        return Ok(axes.iter().map(|a| a.positions.clone()).collect());
    }
    chosen
        .into_iter()
        .map(|a| {
            let motor = readout.alternate_motors[a.device];
            reconstruct::alternate_positions(motor, &axes[a.axis])
                .wrap_err_with(|| format!("positions of alternate motor '{}'", motor.name()))
        })
        .collect()
}
