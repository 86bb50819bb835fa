//! Background retention sweeper.
//!
//! Purges telemetry samples and drift events on independent horizons. Runs
//! on its own task and never blocks the worker pool; a failed sweep is
//! logged and retried at the next tick.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::store::SqliteStore;

/// Spawn the sweeper. Call once at startup; it exits when shutdown fires.
pub fn spawn(
    store: SqliteStore,
    config: Arc<Config>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = sweep(&store, &config).await {
                        tracing::error!("retention sweep failed: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("retention sweeper stopped");
    })
}

pub async fn sweep(store: &SqliteStore, config: &Config) -> anyhow::Result<()> {
    let now = Utc::now();

    let sample_cutoff = now - chrono::Duration::from_std(config.telemetry_retention)?;
    let purged = store.purge_samples(sample_cutoff).await?;
    if purged > 0 {
        tracing::info!(rows = purged, "purged expired telemetry samples");
    }

    let event_cutoff = now - chrono::Duration::from_std(config.drift_events_retention)?;
    let purged = store.purge_drift_events(event_cutoff).await?;
    if purged > 0 {
        tracing::info!(rows = purged, "purged expired drift events");
    }

    Ok(())
}
