use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {detail}")]
    Validation { detail: String },

    #[error("ingest queue full")]
    QueueFull,

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn validation(detail: impl Into<String>) -> Self {
        AppError::Validation {
            detail: detail.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation { detail } => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "validation_error",
                    "detail": detail,
                }),
            ),
            AppError::QueueFull => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": "queue_full" }),
            ),
            AppError::UnknownService(service_id) => (
                StatusCode::NOT_FOUND,
                json!({
                    "error": "unknown_service",
                    "detail": format!("no telemetry recorded for '{}'", service_id),
                }),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "internal_error",
                        "detail": "internal server error",
                    }),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "internal_error",
                        "detail": "internal server error",
                    }),
                )
            }
        };

        let mut response = (status, Json(body)).into_response();

        // Backpressure is retriable; tell clients when to come back.
        if matches!(self, AppError::QueueFull) {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("1"));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_maps_to_retriable_503() {
        let resp = AppError::QueueFull.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers().get("retry-after").unwrap(), "1");
    }

    #[test]
    fn validation_maps_to_400() {
        let resp = AppError::validation("latency_ms must be >= 0").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
