use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod handlers;

/// Build the public router. Ingest and queries under `/v1`, liveness at
/// `/health`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::liveness))
        .route("/v1/telemetry", post(handlers::ingest))
        .route("/v1/health/:service_id", get(handlers::service_health))
        .route("/v1/baseline/:service_id", get(handlers::service_baseline))
        .route("/v1/drift/:service_id", get(handlers::service_drift_events))
        .route("/v1/system/status", get(handlers::system_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
