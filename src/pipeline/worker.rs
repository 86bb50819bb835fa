//! Worker pool: one task per queue shard.
//!
//! Each sample runs the full §-by-§ pipeline step under its service lock:
//! persist the raw sample, refresh the baseline when due, score against the
//! cached baseline, step the state machine, and commit the whole outcome in
//! one store transaction. The in-memory context only advances after the
//! commit lands, so a failed write never leaves memory ahead of disk.
//!
//! No failure crosses the worker boundary; everything becomes a log event
//! and a counter.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::detector::{baseline as stats, zscore, StepOutcome, Transition};
use crate::metrics::Metrics;
use crate::models::{Baseline, DriftEvent, Sample, ZScorePair};
use crate::pipeline::context::ContextRegistry;
use crate::store::SqliteStore;

/// Spawn one worker per shard receiver.
pub fn spawn_workers(
    receivers: Vec<mpsc::Receiver<Sample>>,
    store: SqliteStore,
    registry: Arc<ContextRegistry>,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(worker_id, rx)| {
            tokio::spawn(run(
                worker_id,
                rx,
                store.clone(),
                registry.clone(),
                config.clone(),
                metrics.clone(),
                shutdown.clone(),
            ))
        })
        .collect()
}

async fn run(
    worker_id: usize,
    mut rx: mpsc::Receiver<Sample>,
    store: SqliteStore,
    registry: Arc<ContextRegistry>,
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker_id, "worker started");
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(sample) => process_sample(&store, &registry, &config, &metrics, sample).await,
                None => break,
            },
            _ = shutdown.changed() => {
                drain(&mut rx, &store, &registry, &config, &metrics).await;
                break;
            }
        }
    }
    tracing::debug!(worker_id, "worker stopped");
}

/// Clear whatever is buffered in the shard, bounded by the drain deadline.
async fn drain(
    rx: &mut mpsc::Receiver<Sample>,
    store: &SqliteStore,
    registry: &ContextRegistry,
    config: &Config,
    metrics: &Metrics,
) {
    let deadline = tokio::time::Instant::now() + config.drain_timeout;
    let mut drained = 0u64;
    while let Ok(sample) = rx.try_recv() {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("drain deadline reached, abandoning remaining queued samples");
            break;
        }
        process_sample(store, registry, config, metrics, sample).await;
        drained += 1;
    }
    if drained > 0 {
        tracing::info!(drained, "drained queued samples on shutdown");
    }
}

/// One full pipeline step for one sample.
pub async fn process_sample(
    store: &SqliteStore,
    registry: &ContextRegistry,
    config: &Config,
    metrics: &Metrics,
    sample: Sample,
) {
    let rehydrated = tokio::time::timeout(
        config.store_timeout,
        registry.get_or_rehydrate(store, &sample.service_id),
    )
    .await
    .map_err(|_| anyhow::anyhow!("rehydration timed out after {:?}", config.store_timeout))
    .and_then(|r| r);
    let context = match rehydrated {
        Ok(context) => context,
        Err(e) => {
            metrics.samples_dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::warn!(
                service_id = %sample.service_id,
                error = %e,
                "dropping sample: context rehydration failed"
            );
            return;
        }
    };
    let mut context = context.lock().await;

    // Everything below works on scratch copies; the context is only written
    // back once the store commit succeeds.
    let mut machine = context.machine.clone();
    let total_samples = context.total_samples + 1;
    let mut samples_since_refresh = context.samples_since_refresh + 1;
    let mut baseline = context.baseline.clone();

    let first_baseline_due =
        baseline.is_none() && total_samples >= config.min_samples_for_baseline as u64;
    let cadence_due =
        baseline.is_some() && samples_since_refresh >= config.baseline_refresh_interval as u64;

    let mut refreshed: Option<Baseline> = None;
    if first_baseline_due || cadence_due {
        match recompute_baseline(store, config, &sample).await {
            Ok(computed) => {
                refreshed = Some(computed.clone());
                baseline = Some(computed);
                samples_since_refresh = 0;
            }
            Err(e) => {
                // Keep the cached baseline and try again on the next sample.
                tracing::warn!(
                    service_id = %sample.service_id,
                    error = %e,
                    "baseline refresh failed, keeping cached baseline"
                );
            }
        }
    }

    let mut transitions: Vec<Transition> = Vec::new();
    if baseline.is_some() {
        if let Some(transition) = machine.baseline_ready() {
            transitions.push(transition);
        }
    }
    if let Some(baseline) = &baseline {
        let (latency_z, payload_z) = zscore::zscores(&sample, baseline);
        let pair = ZScorePair::new(sample.timestamp, latency_z, payload_z);
        if let StepOutcome::Transition(transition) = machine.observe(pair) {
            transitions.push(transition);
        }
    }

    let now = Utc::now();
    let mut health = context.health.clone();
    let mut health_dirty = !context.health_persisted;
    let mut events: Vec<DriftEvent> = Vec::new();
    for transition in &transitions {
        health.state = transition.to;
        health.transition_timestamp = now;
        health.metadata = serde_json::to_value(&transition.reason)
            .unwrap_or_else(|_| serde_json::json!({}));
        health_dirty = true;
        events.push(DriftEvent::record(
            &sample.service_id,
            now,
            transition.from,
            transition.to,
            transition.trigger_samples.clone(),
            transition.reason.clone(),
        ));
    }

    let commit = commit_with_retry(
        store,
        config,
        &sample,
        refreshed.as_ref(),
        if health_dirty { Some(&health) } else { None },
        &events,
    )
    .await;

    match commit {
        Ok(()) => {
            for transition in &transitions {
                tracing::info!(
                    service_id = %sample.service_id,
                    from = %transition.from,
                    to = %transition.to,
                    reason = transition.reason.label(),
                    "health state transition"
                );
            }
            context.machine = machine;
            context.total_samples = total_samples;
            context.samples_since_refresh = samples_since_refresh;
            context.baseline = baseline;
            context.health = health;
            context.health_persisted = true;

            metrics
                .samples_processed
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            metrics
                .transitions
                .fetch_add(events.len() as u64, std::sync::atomic::Ordering::Relaxed);
        }
        Err(e) => {
            // In-memory state was never advanced; the service resumes from
            // its previous counters on the next sample.
            metrics
                .samples_dropped
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::error!(
                service_id = %sample.service_id,
                error = %e,
                "dropping sample after store failure"
            );
        }
    }
}

/// Recompute the baseline over the most recent window. The in-flight sample
/// is merged at the head in memory: it only becomes durable when the outcome
/// commits, so the stored window cannot include it yet.
async fn recompute_baseline(
    store: &SqliteStore,
    config: &Config,
    sample: &Sample,
) -> anyhow::Result<Baseline> {
    let stored = tokio::time::timeout(
        config.store_timeout,
        store.recent_samples(&sample.service_id, config.baseline_window_size),
    )
    .await
    .map_err(|_| anyhow::anyhow!("recent_samples timed out after {:?}", config.store_timeout))??;

    let mut window = Vec::with_capacity(stored.len() + 1);
    window.push(sample.clone());
    window.extend(stored);
    window.truncate(config.baseline_window_size);

    Ok(stats::compute(&sample.service_id, &window, Utc::now()))
}

async fn commit_with_retry(
    store: &SqliteStore,
    config: &Config,
    sample: &Sample,
    baseline: Option<&Baseline>,
    health: Option<&crate::models::HealthState>,
    events: &[DriftEvent],
) -> anyhow::Result<()> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = tokio::time::timeout(
            config.store_timeout,
            store.commit_outcome(sample, baseline, health, events),
        )
        .await;

        let err = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => {
                if is_fatal(&e) {
                    return Err(e.context("non-retriable store failure"));
                }
                e
            }
            Err(_) => anyhow::anyhow!("store commit timed out after {:?}", config.store_timeout),
        };

        if attempt > config.store_retry_limit {
            return Err(err.context(format!("store commit failed after {} attempts", attempt)));
        }

        let backoff = calculate_backoff(config.store_retry_backoff_ms, attempt);
        tracing::warn!(
            service_id = %sample.service_id,
            attempt,
            "transient store failure, retrying in {:?}: {}",
            backoff,
            err
        );
        tokio::time::sleep(backoff).await;
    }
}

/// Constraint and decode failures will not heal on retry.
fn is_fatal(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<sqlx::Error>(),
        Some(sqlx::Error::Database(_))
            | Some(sqlx::Error::ColumnDecode { .. })
            | Some(sqlx::Error::Decode(_))
    )
}

/// Exponential backoff with jitter: base * 2^(attempt − 1), capped.
fn calculate_backoff(base_ms: u64, attempt: u32) -> Duration {
    let base = base_ms.max(1) as f64;
    let raw = base * 2_f64.powi(attempt as i32 - 1);
    let capped = raw.min(5_000.0);
    let jitter = rand::thread_rng().gen_range(0..=base_ms.max(1) / 2);
    Duration::from_millis(capped as u64 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        // Jitter is bounded by base/2, so ranges are easy to pin down.
        let first = calculate_backoff(100, 1).as_millis();
        assert!((100..=150).contains(&first));

        let third = calculate_backoff(100, 3).as_millis();
        assert!((400..=450).contains(&third));

        let huge = calculate_backoff(100, 20).as_millis();
        assert!(huge <= 5_050);
    }
}
