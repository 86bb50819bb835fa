//! Bounded ingest queue between the HTTP edge and the worker pool.
//!
//! The queue is sharded by `service_id` hash: every sample for a service
//! lands in the same FIFO channel and is consumed by the same worker, which
//! preserves per-service processing order without any cross-shard lock. The
//! aggregate capacity bound is split evenly across shards.
//!
//! Enqueue never blocks. A full shard rejects the sample — the 503 path is
//! part of the contract, not a buffer to grow.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::models::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// The target shard is at capacity.
    Full,
    /// The queue stopped accepting (shutdown).
    Closed,
}

pub struct IngestQueue {
    shards: Vec<mpsc::Sender<Sample>>,
    closed: AtomicBool,
}

impl IngestQueue {
    /// Build a queue with `shard_count` shards totaling `capacity` slots,
    /// returning the receivers the worker pool consumes from.
    pub fn with_shards(capacity: usize, shard_count: usize) -> (Self, Vec<mpsc::Receiver<Sample>>) {
        let shard_count = shard_count.max(1);
        let per_shard = (capacity / shard_count).max(1);

        let mut shards = Vec::with_capacity(shard_count);
        let mut receivers = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            let (tx, rx) = mpsc::channel(per_shard);
            shards.push(tx);
            receivers.push(rx);
        }

        (
            Self {
                shards,
                closed: AtomicBool::new(false),
            },
            receivers,
        )
    }

    pub fn enqueue(&self, sample: Sample) -> EnqueueOutcome {
        if self.closed.load(Ordering::Relaxed) {
            return EnqueueOutcome::Closed;
        }
        let shard = self.shard_for(&sample.service_id);
        match self.shards[shard].try_send(sample) {
            Ok(()) => EnqueueOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Stop accepting new samples. Buffered samples remain for the drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, service_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        service_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(service_id: &str) -> Sample {
        Sample {
            service_id: service_id.into(),
            timestamp: Utc::now(),
            latency_ms: 100.0,
            payload_kb: 1.0,
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn same_service_always_maps_to_same_shard() {
        let (queue, _rx) = IngestQueue::with_shards(100, 4);
        let first = queue.shard_for("svc-a");
        for _ in 0..32 {
            assert_eq!(queue.shard_for("svc-a"), first);
        }
    }

    #[tokio::test]
    async fn full_shard_rejects_without_blocking() {
        let (queue, _rx) = IngestQueue::with_shards(3, 1);
        for _ in 0..3 {
            assert_eq!(queue.enqueue(sample("svc-a")), EnqueueOutcome::Accepted);
        }
        assert_eq!(queue.enqueue(sample("svc-a")), EnqueueOutcome::Full);
    }

    #[tokio::test]
    async fn closed_queue_rejects_but_keeps_buffered_samples() {
        let (queue, mut rx) = IngestQueue::with_shards(3, 1);
        assert_eq!(queue.enqueue(sample("svc-a")), EnqueueOutcome::Accepted);
        queue.close();
        assert_eq!(queue.enqueue(sample("svc-a")), EnqueueOutcome::Closed);
        assert!(rx.remove(0).try_recv().is_ok());
    }

    #[tokio::test]
    async fn capacity_splits_across_shards_with_a_floor_of_one() {
        let (queue, _rx) = IngestQueue::with_shards(1, 8);
        assert_eq!(queue.shard_count(), 8);
        // Every shard still holds at least one sample.
        assert_eq!(queue.enqueue(sample("svc-a")), EnqueueOutcome::Accepted);
    }
}
