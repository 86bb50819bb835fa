pub mod baseline;
pub mod drift_event;
pub mod health;
pub mod sample;

pub use baseline::Baseline;
pub use drift_event::{DriftEvent, ZScorePair};
pub use health::{HealthState, ServiceState, TransitionReason};
pub use sample::Sample;
