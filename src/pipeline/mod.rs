//! The ingest pipeline: bounded sharded queue, per-service contexts, and the
//! worker loop that ties samples to the detector and the store.

pub mod context;
pub mod queue;
pub mod worker;

pub use context::{ContextRegistry, ServiceContext};
pub use queue::{EnqueueOutcome, IngestQueue};
