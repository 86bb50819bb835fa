use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::health::{ServiceState, TransitionReason};

/// JSON carries no IEEE infinities, so degenerate-variance z-scores are
/// clamped to this magnitude before they enter an audit record.
pub const Z_CLAMP: f64 = 1e6;

/// Z-score pair for one sample, as retained in the trailing audit window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZScorePair {
    pub timestamp: DateTime<Utc>,
    pub latency_z: f64,
    pub payload_z: f64,
}

impl ZScorePair {
    pub fn new(timestamp: DateTime<Utc>, latency_z: f64, payload_z: f64) -> Self {
        Self {
            timestamp,
            latency_z: clamp_finite(latency_z),
            payload_z: clamp_finite(payload_z),
        }
    }

    /// Largest absolute deviation across both metrics.
    pub fn max_abs(&self) -> f64 {
        self.latency_z.abs().max(self.payload_z.abs())
    }
}

fn clamp_finite(z: f64) -> f64 {
    if z.is_finite() {
        z
    } else if z.is_sign_negative() {
        -Z_CLAMP
    } else {
        Z_CLAMP
    }
}

/// Append-only audit record for one health state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEvent {
    pub id: String,
    pub service_id: String,
    pub detected_at: DateTime<Utc>,
    pub previous_state: ServiceState,
    pub new_state: ServiceState,
    /// The z-score pairs leading up to (and including) the trigger sample.
    pub trigger_samples: Vec<ZScorePair>,
    pub reason: TransitionReason,
}

impl DriftEvent {
    pub fn record(
        service_id: &str,
        detected_at: DateTime<Utc>,
        previous_state: ServiceState,
        new_state: ServiceState,
        trigger_samples: Vec<ZScorePair>,
        reason: TransitionReason,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            service_id: service_id.to_string(),
            detected_at,
            previous_state,
            new_state,
            trigger_samples,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_zscores_are_clamped_for_audit() {
        let pair = ZScorePair::new(Utc::now(), f64::INFINITY, 0.0);
        assert_eq!(pair.latency_z, Z_CLAMP);
        assert_eq!(pair.max_abs(), Z_CLAMP);

        let pair = ZScorePair::new(Utc::now(), f64::NEG_INFINITY, 1.0);
        assert_eq!(pair.latency_z, -Z_CLAMP);

        // Clamped values survive a JSON round trip, unlike infinities.
        let json = serde_json::to_string(&pair).unwrap();
        let back: ZScorePair = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pair);
    }
}
