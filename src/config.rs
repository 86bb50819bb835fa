use std::time::Duration;

use serde::Deserialize;

/// Thresholds and counters driving the per-service state machine.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Severe anomaly threshold on max(|z_lat|, |z_pay|).
    pub severe_z_threshold: f64,
    /// Consecutive severe anomalies required to trip drift.
    pub severe_consecutive_trigger: u32,
    /// Moderate anomaly threshold.
    pub moderate_z_threshold: f64,
    /// Trailing window size (samples) for moderate-density detection.
    pub moderate_window: usize,
    /// Anomalies within the trailing window required to trip drift.
    pub moderate_window_trigger: usize,
    /// Ceiling for a sample to count as normal during recovery.
    pub normal_z_ceiling: f64,
    /// Consecutive normal samples required to recover.
    pub recovery_consecutive_trigger: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            severe_z_threshold: 3.0,
            severe_consecutive_trigger: 5,
            moderate_z_threshold: 2.5,
            moderate_window: 20,
            moderate_window_trigger: 10,
            normal_z_ceiling: 2.0,
            recovery_consecutive_trigger: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,

    /// Total ingest queue capacity across all shards. 0 is clamped to 1.
    pub queue_capacity: usize,
    /// Number of worker tasks (= queue shards).
    pub worker_count: usize,

    /// Samples required before a service gets its first baseline.
    pub min_samples_for_baseline: usize,
    /// Baselines are computed over the most recent this-many samples.
    pub baseline_window_size: usize,
    /// Recompute the baseline every this-many samples after the first.
    pub baseline_refresh_interval: usize,

    pub detection: DetectionConfig,

    pub telemetry_retention: Duration,
    pub drift_events_retention: Duration,
    pub sweep_interval: Duration,

    /// Per-call deadline for store operations on the worker path.
    pub store_timeout: Duration,
    /// Transient store failures are retried this many times before the
    /// sample is dropped.
    pub store_retry_limit: u32,
    pub store_retry_backoff_ms: u64,

    /// How long workers keep draining the queue after shutdown is signaled.
    pub drain_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "sqlite://driftwatch.db?mode=rwc".into(),
            queue_capacity: 1000,
            worker_count: 4,
            min_samples_for_baseline: 100,
            baseline_window_size: 1000,
            baseline_refresh_interval: 50,
            detection: DetectionConfig::default(),
            telemetry_retention: Duration::from_secs(7 * 24 * 3600),
            drift_events_retention: Duration::from_secs(30 * 24 * 3600),
            sweep_interval: Duration::from_secs(3600),
            store_timeout: Duration::from_secs(5),
            store_retry_limit: 3,
            store_retry_backoff_ms: 50,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

/// Load configuration from the environment (`.env` honored). Every knob is
/// optional; the defaults are the contract.
pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();

    Ok(Config {
        port: env_parse("DRIFTWATCH_PORT", defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        queue_capacity: env_parse("DRIFTWATCH_QUEUE_CAPACITY", defaults.queue_capacity).max(1),
        worker_count: env_parse("DRIFTWATCH_WORKERS", defaults.worker_count).max(1),
        min_samples_for_baseline: env_parse(
            "DRIFTWATCH_MIN_SAMPLES",
            defaults.min_samples_for_baseline,
        )
        .max(1),
        baseline_window_size: env_parse(
            "DRIFTWATCH_BASELINE_WINDOW",
            defaults.baseline_window_size,
        )
        .max(2),
        baseline_refresh_interval: env_parse(
            "DRIFTWATCH_BASELINE_REFRESH",
            defaults.baseline_refresh_interval,
        )
        .max(1),
        detection: DetectionConfig {
            severe_z_threshold: env_parse(
                "DRIFTWATCH_SEVERE_Z",
                defaults.detection.severe_z_threshold,
            ),
            severe_consecutive_trigger: env_parse(
                "DRIFTWATCH_SEVERE_CONSECUTIVE",
                defaults.detection.severe_consecutive_trigger,
            ),
            moderate_z_threshold: env_parse(
                "DRIFTWATCH_MODERATE_Z",
                defaults.detection.moderate_z_threshold,
            ),
            moderate_window: env_parse(
                "DRIFTWATCH_MODERATE_WINDOW",
                defaults.detection.moderate_window,
            )
            .max(1),
            moderate_window_trigger: env_parse(
                "DRIFTWATCH_MODERATE_TRIGGER",
                defaults.detection.moderate_window_trigger,
            ),
            normal_z_ceiling: env_parse(
                "DRIFTWATCH_NORMAL_Z",
                defaults.detection.normal_z_ceiling,
            ),
            recovery_consecutive_trigger: env_parse(
                "DRIFTWATCH_RECOVERY_CONSECUTIVE",
                defaults.detection.recovery_consecutive_trigger,
            ),
        },
        telemetry_retention: env_secs("DRIFTWATCH_TELEMETRY_RETENTION_SECS", defaults.telemetry_retention),
        drift_events_retention: env_secs(
            "DRIFTWATCH_DRIFT_EVENTS_RETENTION_SECS",
            defaults.drift_events_retention,
        ),
        sweep_interval: env_secs("DRIFTWATCH_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
        store_timeout: env_secs("DRIFTWATCH_STORE_TIMEOUT_SECS", defaults.store_timeout),
        store_retry_limit: env_parse("DRIFTWATCH_STORE_RETRIES", defaults.store_retry_limit),
        store_retry_backoff_ms: env_parse(
            "DRIFTWATCH_STORE_BACKOFF_MS",
            defaults.store_retry_backoff_ms,
        ),
        drain_timeout: env_secs("DRIFTWATCH_DRAIN_TIMEOUT_SECS", defaults.drain_timeout),
    })
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.min_samples_for_baseline, 100);
        assert_eq!(cfg.baseline_window_size, 1000);
        assert_eq!(cfg.baseline_refresh_interval, 50);

        let d = cfg.detection;
        assert_eq!(d.severe_z_threshold, 3.0);
        assert_eq!(d.severe_consecutive_trigger, 5);
        assert_eq!(d.moderate_z_threshold, 2.5);
        assert_eq!(d.moderate_window, 20);
        assert_eq!(d.moderate_window_trigger, 10);
        assert_eq!(d.normal_z_ceiling, 2.0);
        assert_eq!(d.recovery_consecutive_trigger, 50);
    }
}
