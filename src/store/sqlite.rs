//! Durable persistence on a single embedded SQLite file.
//!
//! The pool is capped at one connection: every write is serialized at the
//! store layer, and the per-sample write set commits inside one transaction
//! so readers observe it as a unit. WAL mode keeps the file readable by
//! external tooling while the service runs.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::models::{Baseline, DriftEvent, HealthState, Sample, ServiceState, TransitionReason};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct SystemStats {
    pub service_count: i64,
    pub total_samples: i64,
    pub bytes_on_disk: i64,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Cheap liveness probe.
    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // -- Sample Operations --

    pub async fn append_sample(&self, sample: &Sample) -> anyhow::Result<()> {
        insert_sample(&self.pool, sample).await?;
        Ok(())
    }

    /// Most recent samples for a service, newest first.
    pub async fn recent_samples(
        &self,
        service_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Sample>> {
        let rows = sqlx::query_as::<_, Sample>(
            r#"SELECT service_id, timestamp, latency_ms, payload_kb, ingested_at
               FROM samples
               WHERE service_id = ?
               ORDER BY timestamp DESC, id DESC
               LIMIT ?"#,
        )
        .bind(service_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_samples(&self, service_id: &str) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM samples WHERE service_id = ?",
        )
        .bind(service_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // -- Baseline Operations --

    pub async fn get_baseline(&self, service_id: &str) -> anyhow::Result<Option<Baseline>> {
        let row = sqlx::query_as::<_, Baseline>(
            r#"SELECT service_id, sample_count, mean_latency, stddev_latency,
                      mean_payload, stddev_payload, p50_latency, p95_latency,
                      p99_latency, last_updated
               FROM baselines WHERE service_id = ?"#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert_baseline(&self, baseline: &Baseline) -> anyhow::Result<()> {
        upsert_baseline(&self.pool, baseline).await?;
        Ok(())
    }

    // -- Health Operations --

    pub async fn get_health(&self, service_id: &str) -> anyhow::Result<Option<HealthState>> {
        let row = sqlx::query_as::<_, HealthRow>(
            r#"SELECT service_id, state, transition_timestamp, metadata
               FROM health_states WHERE service_id = ?"#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(HealthRow::into_model).transpose()
    }

    pub async fn upsert_health(&self, health: &HealthState) -> anyhow::Result<()> {
        upsert_health(&self.pool, health).await?;
        Ok(())
    }

    // -- Drift Event Operations --

    pub async fn append_drift_event(&self, event: &DriftEvent) -> anyhow::Result<()> {
        insert_drift_event(&self.pool, event).await?;
        Ok(())
    }

    /// Most recent drift events for a service, newest first.
    pub async fn recent_drift_events(
        &self,
        service_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<DriftEvent>> {
        let rows = sqlx::query_as::<_, DriftEventRow>(
            r#"SELECT id, service_id, detected_at, previous_state, new_state,
                      trigger_samples, metadata
               FROM drift_events
               WHERE service_id = ?
               ORDER BY detected_at DESC, id DESC
               LIMIT ?"#,
        )
        .bind(service_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DriftEventRow::into_model).collect()
    }

    pub async fn count_drift_events(&self, service_id: &str) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM drift_events WHERE service_id = ?",
        )
        .bind(service_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // -- Per-Sample Commit --

    /// Persist the full outcome of processing one sample as a single unit:
    /// the raw sample, plus whichever of the refreshed baseline, updated
    /// health state, and drift events the sample produced.
    pub async fn commit_outcome(
        &self,
        sample: &Sample,
        baseline: Option<&Baseline>,
        health: Option<&HealthState>,
        events: &[DriftEvent],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        insert_sample(&mut *tx, sample).await?;
        if let Some(baseline) = baseline {
            upsert_baseline(&mut *tx, baseline).await?;
        }
        if let Some(health) = health {
            upsert_health(&mut *tx, health).await?;
        }
        for event in events {
            insert_drift_event(&mut *tx, event).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // -- Retention --

    /// Delete samples older than the cutoff. Baselines, health states, and
    /// drift events keep their own retention.
    pub async fn purge_samples(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM samples WHERE timestamp < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn purge_drift_events(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM drift_events WHERE detected_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // -- Diagnostics --

    pub async fn system_stats(&self) -> anyhow::Result<SystemStats> {
        let service_count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM health_states")
            .fetch_one(&self.pool)
            .await?;
        let total_samples = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM samples")
            .fetch_one(&self.pool)
            .await?;
        let bytes_on_disk = sqlx::query_scalar::<_, i64>(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(SystemStats {
            service_count,
            total_samples,
            bytes_on_disk,
        })
    }
}

// -- Shared statements (used standalone and inside commit_outcome) --

async fn insert_sample<'a, E>(executor: E, sample: &Sample) -> sqlx::Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO samples (service_id, timestamp, latency_ms, payload_kb, ingested_at)
           VALUES (?, ?, ?, ?, ?)"#,
    )
    .bind(&sample.service_id)
    .bind(sample.timestamp)
    .bind(sample.latency_ms)
    .bind(sample.payload_kb)
    .bind(sample.ingested_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn upsert_baseline<'a, E>(executor: E, baseline: &Baseline) -> sqlx::Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO baselines (service_id, sample_count, mean_latency, stddev_latency,
                                  mean_payload, stddev_payload, p50_latency, p95_latency,
                                  p99_latency, last_updated)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(service_id) DO UPDATE SET
               sample_count   = excluded.sample_count,
               mean_latency   = excluded.mean_latency,
               stddev_latency = excluded.stddev_latency,
               mean_payload   = excluded.mean_payload,
               stddev_payload = excluded.stddev_payload,
               p50_latency    = excluded.p50_latency,
               p95_latency    = excluded.p95_latency,
               p99_latency    = excluded.p99_latency,
               last_updated   = excluded.last_updated"#,
    )
    .bind(&baseline.service_id)
    .bind(baseline.sample_count)
    .bind(baseline.mean_latency)
    .bind(baseline.stddev_latency)
    .bind(baseline.mean_payload)
    .bind(baseline.stddev_payload)
    .bind(baseline.p50_latency)
    .bind(baseline.p95_latency)
    .bind(baseline.p99_latency)
    .bind(baseline.last_updated)
    .execute(executor)
    .await?;
    Ok(())
}

async fn upsert_health<'a, E>(executor: E, health: &HealthState) -> sqlx::Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO health_states (service_id, state, transition_timestamp, metadata)
           VALUES (?, ?, ?, ?)
           ON CONFLICT(service_id) DO UPDATE SET
               state                = excluded.state,
               transition_timestamp = excluded.transition_timestamp,
               metadata             = excluded.metadata"#,
    )
    .bind(&health.service_id)
    .bind(health.state.as_str())
    .bind(health.transition_timestamp)
    .bind(health.metadata.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_drift_event<'a, E>(executor: E, event: &DriftEvent) -> sqlx::Result<()>
where
    E: sqlx::Executor<'a, Database = sqlx::Sqlite>,
{
    let trigger_samples =
        serde_json::to_string(&event.trigger_samples).unwrap_or_else(|_| "[]".into());
    let metadata = serde_json::to_string(&event.reason).unwrap_or_else(|_| "{}".into());

    sqlx::query(
        r#"INSERT INTO drift_events (id, service_id, detected_at, previous_state,
                                     new_state, trigger_samples, metadata)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&event.id)
    .bind(&event.service_id)
    .bind(event.detected_at)
    .bind(event.previous_state.as_str())
    .bind(event.new_state.as_str())
    .bind(trigger_samples)
    .bind(metadata)
    .execute(executor)
    .await?;
    Ok(())
}

// -- Row types (TEXT columns decoded into the typed models) --

#[derive(sqlx::FromRow)]
struct HealthRow {
    service_id: String,
    state: String,
    transition_timestamp: DateTime<Utc>,
    metadata: String,
}

impl HealthRow {
    fn into_model(self) -> anyhow::Result<HealthState> {
        let state = ServiceState::parse(&self.state)
            .ok_or_else(|| anyhow::anyhow!("corrupt health state '{}'", self.state))?;
        Ok(HealthState {
            service_id: self.service_id,
            state,
            transition_timestamp: self.transition_timestamp,
            metadata: serde_json::from_str(&self.metadata)
                .unwrap_or_else(|_| serde_json::json!({})),
        })
    }
}

#[derive(sqlx::FromRow)]
struct DriftEventRow {
    id: String,
    service_id: String,
    detected_at: DateTime<Utc>,
    previous_state: String,
    new_state: String,
    trigger_samples: String,
    metadata: String,
}

impl DriftEventRow {
    fn into_model(self) -> anyhow::Result<DriftEvent> {
        let previous_state = ServiceState::parse(&self.previous_state)
            .ok_or_else(|| anyhow::anyhow!("corrupt event state '{}'", self.previous_state))?;
        let new_state = ServiceState::parse(&self.new_state)
            .ok_or_else(|| anyhow::anyhow!("corrupt event state '{}'", self.new_state))?;
        let reason: TransitionReason = serde_json::from_str(&self.metadata)?;
        Ok(DriftEvent {
            id: self.id,
            service_id: self.service_id,
            detected_at: self.detected_at,
            previous_state,
            new_state,
            trigger_samples: serde_json::from_str(&self.trigger_samples).unwrap_or_default(),
            reason,
        })
    }
}
