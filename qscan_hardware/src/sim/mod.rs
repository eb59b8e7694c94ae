//! Simulated quick-scan bench.
//!
//! Devices are single-threaded and share state through `Rc<RefCell<_>>`
//! handles: an encoder observes the same `SimAxis` its motor drives, and MCS
//! units, encoders and the pulse generator agree on bin boundaries through a
//! shared `BinTiming`.
mod encoder;
mod mcs;
mod motor;
mod pulse;

pub use encoder::SimEncoder;
pub use mcs::{SimChannel, SimMcs};
pub use motor::{LinearPseudo, MotorParams, SimMotor};
pub use pulse::SimPulseGenerator;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use qscan_traits::Clock;

use crate::error::HwError;

pub type SharedClock = Arc<dyn Clock + Send + Sync>;

// ── Fault injection ──────────────────────────────────────────────────────────

/// Kind of failure a device operation reports once armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Fail,
    Busy,
    Pause,
    Timeout,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    fault: Fault,
    remaining: Option<u32>,
}

/// Per-operation fault switches. Clones share the same switches, so a test
/// can keep a handle after moving the device into the engine.
#[derive(Debug, Clone, Default)]
pub struct Faults(Rc<RefCell<HashMap<&'static str, Armed>>>);

impl Faults {
    /// Fail every call to `op` until cleared.
    pub fn inject(&self, op: &'static str, fault: Fault) {
        self.0.borrow_mut().insert(
            op,
            Armed {
                fault,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` calls to `op`.
    pub fn inject_times(&self, op: &'static str, fault: Fault, times: u32) {
        self.0.borrow_mut().insert(
            op,
            Armed {
                fault,
                remaining: Some(times),
            },
        );
    }

    pub fn clear(&self, op: &'static str) {
        self.0.borrow_mut().remove(op);
    }

    pub(crate) fn check(&self, device: &str, op: &'static str) -> Result<(), HwError> {
        let mut map = self.0.borrow_mut();
        let Some(armed) = map.get(op).copied() else {
            return Ok(());
        };
        match armed.remaining {
            Some(0) => {
                map.remove(op);
                return Ok(());
            }
            Some(1) => {
                map.remove(op);
            }
            Some(n) => {
                map.insert(
                    op,
                    Armed {
                        remaining: Some(n - 1),
                        ..armed
                    },
                );
            }
            None => {}
        }
        drop(map);
        Err(match armed.fault {
            Fault::Fail => HwError::Injected {
                device: device.to_string(),
                op,
            },
            Fault::Busy => HwError::Busy(device.to_string()),
            Fault::Pause => HwError::PauseRequested,
            Fault::Timeout => HwError::Timeout,
        })
    }
}

// ── Bin timing ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct TimingState {
    t0: Option<Instant>,
    period: f64,
    bins: usize,
    halted_at: Option<Instant>,
}

/// Bin grid shared by everything clocked from the same source.
///
/// Bin `i` spans `[t0 + i*period, t0 + (i+1)*period)`.
#[derive(Debug, Clone, Default)]
pub struct BinTiming(Rc<RefCell<TimingState>>);

impl BinTiming {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&self, now: Instant, period: f64, bins: usize) {
        let mut st = self.0.borrow_mut();
        st.t0 = Some(now);
        st.period = period;
        st.bins = bins;
        st.halted_at = None;
    }

    pub(crate) fn halt(&self, now: Instant) {
        let mut st = self.0.borrow_mut();
        if st.t0.is_some() && st.halted_at.is_none() {
            st.halted_at = Some(now);
        }
    }

    pub(crate) fn reset(&self) {
        *self.0.borrow_mut() = TimingState::default();
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.0.borrow().t0
    }

    pub fn period(&self) -> f64 {
        self.0.borrow().period
    }

    /// Bins fully elapsed at `at`, capped by the programmed bin count and
    /// frozen once the source halts.
    pub fn completed_bins(&self, at: Instant) -> usize {
        let st = self.0.borrow();
        let Some(t0) = st.t0 else {
            return 0;
        };
        let until = st.halted_at.map_or(at, |h| h.min(at));
        if st.period <= 0.0 {
            return st.bins;
        }
        let elapsed = until.saturating_duration_since(t0).as_secs_f64();
        // Tolerate float noise right on a bin edge.
        let whole = (elapsed / st.period + 1e-9).floor();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = whole.max(0.0) as usize;
        whole.min(st.bins)
    }

    pub fn is_running(&self, now: Instant) -> bool {
        let halted = self.0.borrow().halted_at.is_some();
        self.started_at().is_some() && !halted && self.completed_bins(now) < self.0.borrow().bins
    }

    /// Start and end instants of bin `i`.
    pub fn bin_bounds(&self, i: usize) -> Option<(Instant, Instant)> {
        let st = self.0.borrow();
        let t0 = st.t0?;
        #[allow(clippy::cast_precision_loss)]
        let start = offset(t0, st.period * i as f64);
        Some((start, offset(start, st.period)))
    }
}

fn offset(t: Instant, secs: f64) -> Instant {
    if secs.is_finite() && secs > 0.0 {
        t + Duration::from_secs_f64(secs)
    } else {
        t
    }
}

// ── Axis trajectory ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Segment {
    t0: Instant,
    t1: Instant,
    p0: f64,
    p1: f64,
}

#[derive(Debug)]
struct AxisState {
    initial: f64,
    segments: Vec<Segment>,
}

/// Trajectory of one real axis, in real-motor units.
///
/// Moves are constant-velocity segments; the history is kept so encoders can
/// sample past bins after the fact.
#[derive(Debug, Clone)]
pub struct SimAxis(Rc<RefCell<AxisState>>);

impl SimAxis {
    pub fn new(position: f64) -> Self {
        Self(Rc::new(RefCell::new(AxisState {
            initial: position,
            segments: Vec::new(),
        })))
    }

    pub fn position_at(&self, t: Instant) -> f64 {
        let st = self.0.borrow();
        let Some(seg) = st.segments.iter().rev().find(|s| s.t0 <= t) else {
            return st.initial;
        };
        if t >= seg.t1 {
            return seg.p1;
        }
        let span = seg.t1.duration_since(seg.t0).as_secs_f64();
        if span <= 0.0 {
            return seg.p1;
        }
        let frac = t.duration_since(seg.t0).as_secs_f64() / span;
        seg.p0 + (seg.p1 - seg.p0) * frac
    }

    pub fn is_moving(&self, now: Instant) -> bool {
        self.0.borrow().segments.last().is_some_and(|s| now < s.t1)
    }

    pub(crate) fn start_move(&self, now: Instant, target: f64, speed: f64) {
        self.halt(now);
        let p0 = self.position_at(now);
        let dist = (target - p0).abs();
        let secs = if speed > 0.0 { dist / speed } else { 0.0 };
        self.0.borrow_mut().segments.push(Segment {
            t0: now,
            t1: offset(now, secs),
            p0,
            p1: target,
        });
    }

    pub(crate) fn halt(&self, now: Instant) {
        if !self.is_moving(now) {
            return;
        }
        let here = self.position_at(now);
        if let Some(last) = self.0.borrow_mut().segments.last_mut() {
            last.t1 = now;
            last.p1 = here;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qscan_traits::clock::test_clock::TestClock;

    #[test]
    fn axis_interpolates_and_halts() {
        let clock = TestClock::new();
        let axis = SimAxis::new(0.0);
        let t0 = clock.now();
        axis.start_move(t0, 10.0, 2.0);
        clock.sleep(Duration::from_secs(1));
        assert!((axis.position_at(clock.now()) - 2.0).abs() < 1e-9);
        axis.halt(clock.now());
        clock.sleep(Duration::from_secs(10));
        assert!(!axis.is_moving(clock.now()));
        assert!((axis.position_at(clock.now()) - 2.0).abs() < 1e-9);
        // History before the halt is still visible.
        assert!((axis.position_at(t0 + Duration::from_millis(500)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn timing_freezes_on_halt() {
        let clock = TestClock::new();
        let timing = BinTiming::new();
        timing.begin(clock.now(), 0.1, 10);
        clock.sleep(Duration::from_millis(350));
        assert_eq!(timing.completed_bins(clock.now()), 3);
        timing.halt(clock.now());
        clock.sleep(Duration::from_secs(5));
        assert_eq!(timing.completed_bins(clock.now()), 3);
        assert!(!timing.is_running(clock.now()));
    }

    #[test]
    fn one_shot_fault_clears_itself() {
        let faults = Faults::default();
        faults.inject_times("read", Fault::Timeout, 1);
        assert!(matches!(faults.check("enc", "read"), Err(HwError::Timeout)));
        assert!(faults.check("enc", "read").is_ok());
    }
}
