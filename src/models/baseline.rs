use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cached per-service statistics over the most recent sample window.
///
/// Exists only once a service has produced enough samples; refreshed on a
/// fixed cadence rather than per sample, so readers may see a baseline up to
/// one refresh interval behind the raw sample stream.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Baseline {
    pub service_id: String,
    /// Number of samples the statistics were computed over.
    pub sample_count: i64,
    pub mean_latency: f64,
    pub stddev_latency: f64,
    pub mean_payload: f64,
    pub stddev_payload: f64,
    pub p50_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub last_updated: DateTime<Utc>,
}
