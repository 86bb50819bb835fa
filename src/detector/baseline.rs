//! Baseline computation over a service's recent sample window.
//!
//! Means are arithmetic; standard deviations use the N−1 divisor; latency
//! percentiles are nearest-rank on the same window. A zero stddev is a valid
//! (degenerate) baseline — the z-score layer handles it.

use chrono::{DateTime, Utc};

use crate::models::{Baseline, Sample};

/// Compute a baseline from the most recent window of samples.
///
/// `window` is newest-first, as returned by the store, and must be non-empty.
pub fn compute(service_id: &str, window: &[Sample], now: DateTime<Utc>) -> Baseline {
    let latencies: Vec<f64> = window.iter().map(|s| s.latency_ms).collect();
    let payloads: Vec<f64> = window.iter().map(|s| s.payload_kb).collect();

    let (mean_latency, stddev_latency) = mean_stddev(&latencies);
    let (mean_payload, stddev_payload) = mean_stddev(&payloads);

    let mut sorted = latencies;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    Baseline {
        service_id: service_id.to_string(),
        sample_count: window.len() as i64,
        mean_latency,
        stddev_latency,
        mean_payload,
        stddev_payload,
        p50_latency: percentile(&sorted, 50.0),
        p95_latency: percentile(&sorted, 95.0),
        p99_latency: percentile(&sorted, 99.0),
        last_updated: now,
    }
}

/// Arithmetic mean and sample standard deviation (N−1 divisor).
/// Fewer than two values yields a stddev of 0.
pub fn mean_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }

    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    (mean, variance.sqrt())
}

/// Nearest-rank percentile over an ascending-sorted slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(latency: f64, payload: f64) -> Sample {
        Sample {
            service_id: "svc".into(),
            timestamp: Utc::now(),
            latency_ms: latency,
            payload_kb: payload,
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn sample_stddev_uses_n_minus_one() {
        let (mean, stddev) = mean_stddev(&[1.0, 2.0, 3.0, 4.0]);
        assert!((mean - 2.5).abs() < 1e-12);
        // variance = (2.25 + 0.25 + 0.25 + 2.25) / 3 = 5/3
        assert!((stddev - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn single_value_has_zero_stddev() {
        let (mean, stddev) = mean_stddev(&[42.0]);
        assert_eq!(mean, 42.0);
        assert_eq!(stddev, 0.0);
    }

    #[test]
    fn constant_series_is_degenerate() {
        let (mean, stddev) = mean_stddev(&[100.0; 50]);
        assert_eq!(mean, 100.0);
        assert_eq!(stddev, 0.0);
    }

    #[test]
    fn nearest_rank_percentiles() {
        let sorted: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile(&sorted, 50.0), 50.0);
        assert_eq!(percentile(&sorted, 95.0), 95.0);
        assert_eq!(percentile(&sorted, 99.0), 99.0);

        let small = [10.0, 20.0, 30.0];
        assert_eq!(percentile(&small, 50.0), 20.0);
        assert_eq!(percentile(&small, 99.0), 30.0);
    }

    #[test]
    fn baseline_covers_both_metrics() {
        let window: Vec<Sample> = (0..10)
            .map(|i| sample(100.0 + i as f64, 2.0 + i as f64 * 0.1))
            .collect();
        let baseline = compute("svc", &window, Utc::now());

        assert_eq!(baseline.sample_count, 10);
        assert!((baseline.mean_latency - 104.5).abs() < 1e-9);
        assert!((baseline.mean_payload - 2.45).abs() < 1e-9);
        assert!(baseline.stddev_latency > 0.0);
        assert!(baseline.stddev_payload > 0.0);
        assert_eq!(baseline.p50_latency, 104.0);
    }
}
