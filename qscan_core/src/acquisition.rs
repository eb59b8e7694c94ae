//! Arming, starting and draining the multichannel scalers.

use std::time::Duration;

use eyre::WrapErr;
use qscan_traits::{AcquisitionPort, McsMode, MotorPort};

use crate::control::ScanContext;
use crate::devices::ClockSource;
use crate::error::{Result, ScanError};
use crate::hw_error::PortResultExt;
use crate::motion::stop_all;
use crate::planner::AcquisitionPlan;
use crate::util::bin_duration;

/// Pulse width as a fraction of the pulse period.
const PULSE_WIDTH_FRACTION: f64 = 0.01;

fn configure_port(
    port: &mut dyn AcquisitionPort,
    plan: &AcquisitionPlan,
    external: bool,
) -> Result<()> {
    let n = plan.actual_num_measurements;
    port.set_mode(McsMode::PresetTime).port_err()?;
    port.set_measurement_time(plan.measurement_time).port_err()?;
    port.set_num_measurements(n).port_err()?;
    port.clear().port_err()?;
    port.set_external_channel_advance(external).port_err()?;
    if external {
        port.set_external_prescale(1).port_err()?;
        // Externally clocked units wait for the first pulse once started.
        port.start().port_err()?;
    }
    Ok(())
}

/// Configure every MCS in `plan.ports` and the pulse generator, if any.
///
/// On failure every port touched so far, including the one that failed, is
/// stopped and cleared before the error is returned.
pub fn arm(
    mcs: &mut [&mut dyn AcquisitionPort],
    clock: &mut ClockSource<'_>,
    plan: &AcquisitionPlan,
) -> Result<()> {
    let external = matches!(clock, ClockSource::PulseGenerator(_));
    for (k, &idx) in plan.ports.iter().enumerate() {
        let res = configure_port(&mut *mcs[idx], plan, external)
            .wrap_err_with(|| format!("arming '{}'", mcs[idx].name()));
        if let Err(e) = res {
            release(mcs, &plan.ports[..=k]);
            return Err(e);
        }
    }
    if let ClockSource::PulseGenerator(pg) = clock {
        let n = plan.actual_num_measurements;
        let res = pg
            .set_pulse_period(plan.measurement_time)
            .and_then(|()| pg.set_pulse_width(PULSE_WIDTH_FRACTION * plan.measurement_time))
            // One extra pulse closes the last bin.
            .and_then(|()| pg.set_num_pulses(n + 1))
            .port_err()
            .wrap_err_with(|| format!("configuring pulse generator '{}'", pg.name()));
        if let Err(e) = res {
            release(mcs, &plan.ports);
            return Err(e);
        }
    }
    tracing::debug!(
        ports = plan.ports.len(),
        clock = clock.label(),
        n = plan.actual_num_measurements,
        "acquisition armed"
    );
    Ok(())
}

fn release(mcs: &mut [&mut dyn AcquisitionPort], ports: &[usize]) {
    for &idx in ports {
        let port = &mut mcs[idx];
        if let Err(e) = port.stop() {
            tracing::warn!(mcs = port.name(), error = %e, "stop failed");
        }
        if let Err(e) = port.clear() {
            tracing::warn!(mcs = port.name(), error = %e, "clear failed");
        }
    }
}

/// Stop the clock source and every port, best effort.
pub fn stop_acquisition(
    mcs: &mut [&mut dyn AcquisitionPort],
    clock: &mut ClockSource<'_>,
    ports: &[usize],
) {
    if let ClockSource::PulseGenerator(pg) = clock
        && let Err(e) = pg.stop()
    {
        tracing::warn!(pulse_generator = pg.name(), error = %e, "stop failed");
    }
    for &idx in ports {
        let port = &mut mcs[idx];
        if let Err(e) = port.stop() {
            tracing::warn!(mcs = port.name(), error = %e, "stop failed");
        }
    }
}

/// Start counting, wait out the pre-move bins and confirm that every port
/// is busy.
pub fn start_body(
    mcs: &mut [&mut dyn AcquisitionPort],
    clock: &mut ClockSource<'_>,
    plan: &AcquisitionPlan,
    ctx: &ScanContext<'_>,
) -> Result<()> {
    match clock {
        ClockSource::InternalTimer { .. } => {
            for (k, &idx) in plan.ports.iter().enumerate() {
                let res = mcs[idx]
                    .start()
                    .port_err()
                    .wrap_err_with(|| format!("starting '{}'", mcs[idx].name()));
                if let Err(e) = res {
                    stop_acquisition(mcs, clock, &plan.ports[..k]);
                    return Err(e);
                }
            }
        }
        ClockSource::PulseGenerator(pg) => {
            pg.start()
                .port_err()
                .wrap_err_with(|| format!("starting pulse generator '{}'", pg.name()))?;
        }
    }

    let premove = bin_duration(plan.measurement_time)
        .saturating_mul(u32::try_from(plan.premove_measurements).unwrap_or(u32::MAX));
    ctx.clock.sleep(premove);

    let acq = &ctx.cfg.acquisition;
    for attempt in 0..acq.start_poll_attempts {
        if let Err(e) = ctx.control.check_interrupt() {
            stop_acquisition(mcs, clock, &plan.ports);
            return Err(e);
        }
        let mut all_busy = true;
        for &idx in &plan.ports {
            let busy = mcs[idx]
                .is_busy()
                .port_err()
                .wrap_err_with(|| format!("polling '{}'", mcs[idx].name()));
            match busy {
                Ok(true) => {}
                Ok(false) => all_busy = false,
                Err(e) => {
                    stop_acquisition(mcs, clock, &plan.ports);
                    return Err(e);
                }
            }
        }
        if all_busy {
            tracing::debug!(attempt, "all scalers counting");
            return Ok(());
        }
        ctx.clock.sleep(acq.start_poll_interval);
    }
    stop_acquisition(mcs, clock, &plan.ports);
    Err(eyre::Report::new(ScanError::TimedOut(format!(
        "scalers did not start after {} polls",
        acq.start_poll_attempts
    ))))
}

fn clock_busy(mcs: &mut [&mut dyn AcquisitionPort], clock: &mut ClockSource<'_>) -> Result<bool> {
    match clock {
        ClockSource::InternalTimer { mcs: idx } => {
            let port = mcs.get_mut(*idx).ok_or_else(|| {
                eyre::Report::new(ScanError::Configuration(format!(
                    "timer mcs index {idx} out of range"
                )))
            })?;
            port.is_busy()
                .port_err()
                .wrap_err_with(|| format!("polling '{}'", port.name()))
        }
        ClockSource::PulseGenerator(pg) => pg
            .is_busy()
            .port_err()
            .wrap_err_with(|| format!("polling pulse generator '{}'", pg.name())),
    }
}

/// Wait for the clock source to finish the body, then stop motors and
/// counters whatever the outcome.
pub fn wait_for_completion(
    motors: &mut [&mut dyn MotorPort],
    mcs: &mut [&mut dyn AcquisitionPort],
    clock: &mut ClockSource<'_>,
    plan: &AcquisitionPlan,
    ctx: &ScanContext<'_>,
) -> Result<()> {
    let res = poll_completion(mcs, clock, plan, ctx);
    stop_all(motors);
    stop_acquisition(mcs, clock, &plan.ports);
    res
}

fn poll_completion(
    mcs: &mut [&mut dyn AcquisitionPort],
    clock: &mut ClockSource<'_>,
    plan: &AcquisitionPlan,
    ctx: &ScanContext<'_>,
) -> Result<()> {
    let acq = &ctx.cfg.acquisition;
    let deadline = acq.completion_margin.map(|margin| {
        Duration::try_from_secs_f64(plan.acquisition_time())
            .unwrap_or(Duration::MAX)
            .saturating_add(margin)
    });
    let started = ctx.clock.now();
    loop {
        ctx.control.check_interrupt()?;
        if !clock_busy(mcs, clock)? {
            tracing::debug!(
                elapsed_s = ctx.clock.secs_since(started),
                "acquisition complete"
            );
            return Ok(());
        }
        if let Some(limit) = deadline
            && ctx.clock.now().saturating_duration_since(started) > limit
        {
            return Err(eyre::Report::new(ScanError::TimedOut(format!(
                "acquisition still running after {:.1} s",
                limit.as_secs_f64()
            ))));
        }
        ctx.clock.sleep(acq.completion_poll_interval);
    }
}
