//! Process-wide ingest counters, surfaced on the system status endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    /// Samples accepted into the queue by the HTTP edge.
    pub samples_accepted: AtomicU64,
    /// Samples rejected with queue_full.
    pub samples_rejected: AtomicU64,
    /// Samples fully processed and committed.
    pub samples_processed: AtomicU64,
    /// Samples dropped after store retries were exhausted.
    pub samples_dropped: AtomicU64,
    /// Health state transitions observed.
    pub transitions: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub samples_accepted: u64,
    pub samples_rejected: u64,
    pub samples_processed: u64,
    pub samples_dropped: u64,
    pub transitions: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
        }
    }
}
