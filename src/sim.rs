//! Synthetic traffic generator (`driftwatch simulate`).
//!
//! Posts normally-distributed samples for a handful of services to a running
//! instance, optionally shifting one service's latency partway through to
//! exercise drift detection end to end. Queue rejections (503) are counted,
//! not retried — watching the backpressure path is part of the point.

use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::time::Instant;

use crate::cli::SimulateArgs;

pub async fn run(args: SimulateArgs) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let endpoint = format!("{}/v1/telemetry", args.target.trim_end_matches('/'));
    let services = args.services.max(1);
    let rps = args.rps.max(1);

    tracing::info!(
        endpoint = %endpoint,
        services,
        rps,
        duration = args.duration,
        "starting traffic simulation"
    );

    let start = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / rps as f64));
    let mut last_report = Instant::now();

    let mut accepted = 0u64;
    let mut rejected = 0u64;
    let mut failed = 0u64;
    let mut tick = 0u64;

    while start.elapsed() < Duration::from_secs(args.duration) {
        interval.tick().await;
        tick += 1;

        let svc = (tick as usize) % services;
        let mut latency_mean = 120.0 + svc as f64 * 15.0;
        if svc == 0 {
            if let Some(after) = args.drift_after {
                if start.elapsed() >= Duration::from_secs(after) {
                    latency_mean += args.drift_latency;
                }
            }
        }

        let latency = normal(latency_mean, latency_mean * 0.15).max(0.0);
        let payload = normal(2.5, 0.75).max(0.05);
        let body = json!({
            "service_id": format!("sim-svc-{}", svc),
            "latency_ms": latency,
            "payload_kb": payload,
        });

        match client.post(&endpoint).json(&body).send().await {
            Ok(resp) if resp.status().as_u16() == 202 => accepted += 1,
            Ok(resp) if resp.status().as_u16() == 503 => rejected += 1,
            Ok(resp) => {
                failed += 1;
                tracing::warn!(status = %resp.status(), "unexpected ingest response");
            }
            Err(e) => {
                failed += 1;
                tracing::warn!("ingest request failed: {}", e);
            }
        }

        if last_report.elapsed() >= Duration::from_secs(5) {
            tracing::info!(accepted, rejected, failed, "simulation progress");
            last_report = Instant::now();
        }
    }

    tracing::info!(accepted, rejected, failed, "simulation complete");
    Ok(())
}

/// Box–Muller transform over rand's uniform source.
fn normal(mean: f64, stddev: f64) -> f64 {
    let mut rng = rand::thread_rng();
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + stddev * z
}
