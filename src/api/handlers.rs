use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::AppError;
use crate::models::{Baseline, Sample, ServiceState};
use crate::pipeline::EnqueueOutcome;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct IngestRequest {
    pub service_id: String,
    pub latency_ms: f64,
    pub payload_kb: f64,
    /// Defaults to ingest time when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub service_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub service_id: String,
    pub state: ServiceState,
    pub transition_timestamp: DateTime<Utc>,
    pub sample_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Baseline>,
    pub metadata: serde_json::Value,
}

#[derive(Deserialize)]
pub struct DriftEventParams {
    pub limit: Option<usize>,
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /v1/telemetry — validate and enqueue one sample.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    if req.service_id.is_empty() || req.service_id.len() > 128 {
        return Err(AppError::validation(
            "service_id must be between 1 and 128 characters",
        ));
    }
    if !req.latency_ms.is_finite() || req.latency_ms < 0.0 {
        return Err(AppError::validation(
            "latency_ms must be a non-negative number",
        ));
    }
    if !req.payload_kb.is_finite() || req.payload_kb < 0.0 {
        return Err(AppError::validation(
            "payload_kb must be a non-negative number",
        ));
    }

    let now = Utc::now();
    let timestamp = req.timestamp.unwrap_or(now);
    let sample = Sample {
        service_id: req.service_id.clone(),
        timestamp,
        latency_ms: req.latency_ms,
        payload_kb: req.payload_kb,
        ingested_at: now,
    };

    match state.queue.enqueue(sample) {
        EnqueueOutcome::Accepted => {
            state.metrics.samples_accepted.fetch_add(1, Ordering::Relaxed);
            Ok((
                StatusCode::ACCEPTED,
                Json(IngestResponse {
                    status: "accepted",
                    service_id: req.service_id,
                    timestamp,
                }),
            ))
        }
        EnqueueOutcome::Full | EnqueueOutcome::Closed => {
            state.metrics.samples_rejected.fetch_add(1, Ordering::Relaxed);
            Err(AppError::QueueFull)
        }
    }
}

/// GET /v1/health/:service_id — current health plus the cached baseline.
pub async fn service_health(
    State(state): State<Arc<AppState>>,
    Path(service_id): Path<String>,
) -> Result<Json<HealthResponse>, AppError> {
    let health = state
        .store
        .get_health(&service_id)
        .await?
        .ok_or_else(|| AppError::UnknownService(service_id.clone()))?;
    let sample_count = state.store.count_samples(&service_id).await?;
    let baseline = state.store.get_baseline(&service_id).await?;

    Ok(Json(HealthResponse {
        service_id,
        state: health.state,
        transition_timestamp: health.transition_timestamp,
        sample_count,
        baseline,
        metadata: health.metadata,
    }))
}

/// GET /v1/baseline/:service_id — 404 until the first baseline exists.
pub async fn service_baseline(
    State(state): State<Arc<AppState>>,
    Path(service_id): Path<String>,
) -> Result<Json<Baseline>, AppError> {
    let baseline = state
        .store
        .get_baseline(&service_id)
        .await?
        .ok_or_else(|| AppError::UnknownService(service_id.clone()))?;
    Ok(Json(baseline))
}

/// GET /v1/drift/:service_id — recent transition audit records.
pub async fn service_drift_events(
    State(state): State<Arc<AppState>>,
    Path(service_id): Path<String>,
    Query(params): Query<DriftEventParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    // A service is known once it has a health row.
    if state.store.get_health(&service_id).await?.is_none() {
        return Err(AppError::UnknownService(service_id));
    }
    let limit = params.limit.unwrap_or(50).min(500);
    let events = state.store.recent_drift_events(&service_id, limit).await?;
    Ok(Json(json!({
        "service_id": service_id,
        "events": events,
    })))
}

/// GET /v1/system/status — process-level diagnostics.
pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let stats = state.store.system_stats().await?;
    Ok(Json(json!({
        "status": if state.queue.is_closed() { "draining" } else { "ok" },
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "services_monitored": stats.service_count,
        "total_telemetry_records": stats.total_samples,
        "database_size_mb": stats.bytes_on_disk as f64 / (1024.0 * 1024.0),
        "ingest": state.metrics.snapshot(),
    })))
}

/// GET /health — 200 while the queue accepts and the store responds.
pub async fn liveness(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    if state.queue.is_closed() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    state
        .store
        .ping()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok("ok")
}
