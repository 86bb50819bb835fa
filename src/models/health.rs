use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of one monitored service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    InsufficientData,
    Stable,
    DriftDetected,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::InsufficientData => "INSUFFICIENT_DATA",
            ServiceState::Stable => "STABLE",
            ServiceState::DriftDetected => "DRIFT_DETECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSUFFICIENT_DATA" => Some(ServiceState::InsufficientData),
            "STABLE" => Some(ServiceState::Stable),
            "DRIFT_DETECTED" => Some(ServiceState::DriftDetected),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable health row. Exactly one per observed service; state transitions
/// are the only mutations after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthState {
    pub service_id: String,
    pub state: ServiceState,
    pub transition_timestamp: DateTime<Utc>,
    /// JSON view of the last [`TransitionReason`], `{}` before any transition.
    pub metadata: serde_json::Value,
}

impl HealthState {
    /// Fresh record for a service seen for the first time.
    pub fn initial(service_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            service_id: service_id.to_string(),
            state: ServiceState::InsufficientData,
            transition_timestamp: now,
            metadata: serde_json::json!({}),
        }
    }
}

/// Why a state transition fired. The serialized form is the wire and storage
/// contract; this enum is the in-memory contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TransitionReason {
    /// First baseline became available for the service.
    BaselineReady,
    /// A run of consecutive samples each exceeded the severe threshold.
    ConsecutiveSevereAnomalies {
        consecutive_count: u32,
        max_zscore: f64,
    },
    /// Too many moderate anomalies inside the trailing window.
    ModerateAnomalyDensity {
        window_count: u32,
        window_size: u32,
    },
    /// Enough consecutive normal samples to leave the drifted state.
    Recovery { consecutive_count: u32 },
}

impl TransitionReason {
    pub fn label(&self) -> &'static str {
        match self {
            TransitionReason::BaselineReady => "baseline_ready",
            TransitionReason::ConsecutiveSevereAnomalies { .. } => "consecutive_severe_anomalies",
            TransitionReason::ModerateAnomalyDensity { .. } => "moderate_anomaly_density",
            TransitionReason::Recovery { .. } => "recovery",
        }
    }
}
