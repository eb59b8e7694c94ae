//! Device implementations of the quick-scan ports.
//!
//! Only simulated devices live here today. They share one virtual timeline
//! through a `Clock`, so a full scan runs deterministically under
//! `TestClock` and in real time under `MonotonicClock`.
pub mod error;
pub mod sim;

pub use error::HwError;
pub use sim::{
    BinTiming, Fault, Faults, LinearPseudo, MotorParams, SimAxis, SimChannel, SimEncoder, SimMcs,
    SimMotor, SimPulseGenerator,
};
