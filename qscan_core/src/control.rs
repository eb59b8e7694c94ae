//! Operator interrupt and pause signalling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use qscan_traits::Clock;

use crate::error::{Result, ScanError};

/// Shared interrupt/pause flags. Clones observe the same flags, so a signal
/// handler on another thread can hold one.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    interrupt: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Clear both flags before reusing the token for another scan.
    pub fn reset(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
        self.pause.store(false, Ordering::SeqCst);
    }
}

/// Decides what happens while a scan is paused. Returns `true` to resume,
/// `false` to abort.
pub type PauseHandler = Box<dyn Fn(&CancellationToken) -> bool>;

/// Token plus the pause policy the coordinators consult at each poll.
#[derive(Default)]
pub struct ScanControl {
    token: CancellationToken,
    pause_handler: Option<PauseHandler>,
}

impl std::fmt::Debug for ScanControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanControl")
            .field("token", &self.token)
            .field("custom_pause_handler", &self.pause_handler.is_some())
            .finish()
    }
}

impl ScanControl {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            pause_handler: None,
        }
    }

    #[must_use]
    pub fn with_pause_handler(mut self, f: impl Fn(&CancellationToken) -> bool + 'static) -> Self {
        self.pause_handler = Some(Box::new(f));
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// `Err(Interrupted)` once the operator has asked to stop.
    pub fn check_interrupt(&self) -> Result<()> {
        if self.token.is_interrupted() {
            return Err(eyre::Report::new(ScanError::Interrupted));
        }
        Ok(())
    }

    /// Block until the pause is lifted. Without a custom handler this polls
    /// the token until the pause flag clears or an interrupt arrives.
    pub fn handle_pause(&self, clock: &dyn Clock, poll: Duration) -> Result<()> {
        tracing::info!("scan paused");
        let resume = match &self.pause_handler {
            Some(h) => h(&self.token),
            None => loop {
                if self.token.is_interrupted() {
                    break false;
                }
                if !self.token.is_pause_requested() {
                    break true;
                }
                clock.sleep(poll);
            },
        };
        if !resume || self.token.is_interrupted() {
            tracing::warn!("scan aborted while paused");
            return Err(eyre::Report::new(ScanError::Interrupted));
        }
        self.token.resume();
        tracing::info!("scan resumed");
        Ok(())
    }
}

/// Everything a coordinator needs besides the devices themselves.
#[derive(Clone, Copy)]
pub struct ScanContext<'c> {
    pub clock: &'c dyn Clock,
    pub control: &'c ScanControl,
    pub cfg: &'c crate::config::EngineCfg,
}
