//! In-memory per-service state, rehydrated lazily from the store.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::DetectionConfig;
use crate::detector::StateMachine;
use crate::models::{Baseline, HealthState};
use crate::store::SqliteStore;

/// Everything one live service owns: the cached baseline, its state machine
/// (counters and trailing windows), and the durable health view. Guarded by
/// a per-service lock; workers hold it for the whole per-sample step.
pub struct ServiceContext {
    pub service_id: String,
    pub baseline: Option<Baseline>,
    pub machine: StateMachine,
    pub health: HealthState,
    /// False until the initial INSUFFICIENT_DATA row has been committed.
    pub health_persisted: bool,
    /// Samples observed for this service, lifetime (survives rehydration via
    /// the store count; retention purges only matter before the first
    /// baseline, which is long before retention kicks in).
    pub total_samples: u64,
    /// Samples since the baseline was last recomputed.
    pub samples_since_refresh: u64,
}

/// `service_id → context` map shared by the worker pool and the HTTP edge.
pub struct ContextRegistry {
    contexts: DashMap<String, Arc<Mutex<ServiceContext>>>,
    detection: DetectionConfig,
}

impl ContextRegistry {
    pub fn new(detection: DetectionConfig) -> Self {
        Self {
            contexts: DashMap::new(),
            detection,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Fetch the context for a service, loading durable state on first
    /// access after boot. Samples for one service are handled by a single
    /// worker, so two loads for the same id cannot race.
    pub async fn get_or_rehydrate(
        &self,
        store: &SqliteStore,
        service_id: &str,
    ) -> anyhow::Result<Arc<Mutex<ServiceContext>>> {
        if let Some(ctx) = self.contexts.get(service_id) {
            return Ok(ctx.clone());
        }

        let baseline = store.get_baseline(service_id).await?;
        let stored_health = store.get_health(service_id).await?;
        let total_samples = store.count_samples(service_id).await? as u64;

        let (health, health_persisted) = match stored_health {
            Some(health) => (health, true),
            None => (HealthState::initial(service_id, Utc::now()), false),
        };

        tracing::debug!(
            service_id,
            state = %health.state,
            total_samples,
            has_baseline = baseline.is_some(),
            "rehydrated service context"
        );

        let context = ServiceContext {
            service_id: service_id.to_string(),
            baseline,
            machine: StateMachine::restore(health.state, self.detection.clone()),
            health,
            health_persisted,
            total_samples,
            samples_since_refresh: 0,
        };

        let entry = self
            .contexts
            .entry(service_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(context)));
        Ok(entry.value().clone())
    }
}
