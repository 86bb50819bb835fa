use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One telemetry observation for a service. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sample {
    pub service_id: String,
    /// When the observation happened (caller-supplied or ingest time).
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
    pub payload_kb: f64,
    /// When the ingest edge accepted the sample.
    pub ingested_at: DateTime<Utc>,
}
