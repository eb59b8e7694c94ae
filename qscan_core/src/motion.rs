//! Multi-axis moves with cooperative pause/interrupt handling.

use std::time::Instant;

use eyre::WrapErr;
use qscan_traits::{MotorPort, WaitMode};

use crate::control::ScanContext;
use crate::error::{Result, ScanError, classify};
use crate::hw_error::PortResultExt;

/// Soft-abort every motor, logging but not propagating failures.
pub fn stop_all(motors: &mut [&mut dyn MotorPort]) {
    for m in motors.iter_mut() {
        if let Err(e) = m.soft_abort() {
            tracing::warn!(motor = m.name(), error = %e, "soft_abort failed");
        }
    }
}

/// Issue a non-blocking absolute move on every axis.
///
/// If any axis refuses, the axes already started are stopped and the error
/// is returned.
pub fn start_move(
    motors: &mut [&mut dyn MotorPort],
    targets: &[f64],
    mode: WaitMode,
) -> Result<()> {
    if motors.len() != targets.len() {
        return Err(eyre::Report::new(ScanError::Fatal(format!(
            "{} targets for {} motors",
            targets.len(),
            motors.len()
        ))));
    }
    for i in 0..motors.len() {
        let m = &mut motors[i];
        let target = targets[i];
        let res = m
            .move_absolute(target, mode)
            .port_err()
            .wrap_err_with(|| format!("moving '{}' to {target}", m.name()));
        if let Err(e) = res {
            stop_all(motors);
            return Err(e);
        }
        tracing::trace!(motor = motors[i].name(), target, ?mode, "move issued");
    }
    Ok(())
}

/// Poll until every axis reports not-busy.
///
/// A pause (operator flag or a motor reporting `PauseRequested`) blocks in
/// the pause handler until the operator resumes, then polling continues with
/// a fresh move timeout. Interrupts, timeouts and any other error stop all
/// axes and propagate.
pub fn wait_for_stop(motors: &mut [&mut dyn MotorPort], ctx: &ScanContext<'_>) -> Result<()> {
    let mut started = ctx.clock.now();
    loop {
        match poll_once(motors, ctx, started) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) if matches!(classify(&e), Some(ScanError::PauseRequested)) => {
                // A device-reported pause holds until the operator resumes.
                ctx.control.token().request_pause();
                if let Err(e) = ctx
                    .control
                    .handle_pause(ctx.clock, ctx.cfg.motion.poll_interval)
                {
                    stop_all(motors);
                    return Err(e);
                }
                started = ctx.clock.now();
            }
            Err(e) => {
                stop_all(motors);
                return Err(e);
            }
        }
        ctx.clock.sleep(ctx.cfg.motion.poll_interval);
    }
}

/// One poll iteration; `Ok(true)` while any axis is still moving.
fn poll_once(
    motors: &mut [&mut dyn MotorPort],
    ctx: &ScanContext<'_>,
    started: Instant,
) -> Result<bool> {
    ctx.control.check_interrupt()?;
    if ctx.control.token().is_pause_requested() {
        return Err(eyre::Report::new(ScanError::PauseRequested));
    }
    let mut busy = false;
    for m in motors.iter_mut() {
        // Query every axis so each driver sees a status poll.
        if m
            .is_busy()
            .port_err()
            .wrap_err_with(|| format!("polling '{}'", m.name()))?
        {
            busy = true;
        }
    }
    if busy
        && let Some(limit) = ctx.cfg.motion.move_timeout
        && ctx.clock.now().saturating_duration_since(started) > limit
    {
        return Err(eyre::Report::new(ScanError::TimedOut(format!(
            "motors still moving after {} ms",
            limit.as_millis()
        ))));
    }
    Ok(busy)
}

/// `start_move` followed by `wait_for_stop`.
pub fn move_and_wait(
    motors: &mut [&mut dyn MotorPort],
    targets: &[f64],
    mode: WaitMode,
    ctx: &ScanContext<'_>,
) -> Result<()> {
    ctx.control.check_interrupt()?;
    start_move(motors, targets, mode)?;
    wait_for_stop(motors, ctx)
}
