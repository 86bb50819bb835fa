//! The statistical core: rolling-window baselines, z-score computation, and
//! the per-service health state machine. Everything here is pure and total —
//! failures can only come from the store layer wrapping it.

pub mod baseline;
pub mod state_machine;
pub mod zscore;

pub use state_machine::{StateMachine, StepOutcome, Transition};
