//! Pure z-score detector: `(sample, baseline) -> (latency_z, payload_z)`.

use crate::models::{Baseline, Sample};

/// Compute the z-score pair for a sample against the cached baseline.
pub fn zscores(sample: &Sample, baseline: &Baseline) -> (f64, f64) {
    (
        zscore(
            sample.latency_ms,
            baseline.mean_latency,
            baseline.stddev_latency,
        ),
        zscore(
            sample.payload_kb,
            baseline.mean_payload,
            baseline.stddev_payload,
        ),
    )
}

/// `(x − μ) / σ`, with the degenerate-variance rule: for σ = 0 the score is
/// 0 when x equals the mean and +∞ otherwise (a severe anomaly — any
/// deviation from a perfectly constant series is maximally surprising).
pub fn zscore(x: f64, mean: f64, stddev: f64) -> f64 {
    if stddev > 0.0 {
        (x - mean) / stddev
    } else if x == mean {
        0.0
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_mean_is_zero() {
        assert_eq!(zscore(150.0, 150.0, 25.0), 0.0);
    }

    #[test]
    fn one_sigma_is_one() {
        assert_eq!(zscore(175.0, 150.0, 25.0), 1.0);
        assert_eq!(zscore(125.0, 150.0, 25.0), -1.0);
    }

    #[test]
    fn zero_variance_at_mean_is_zero() {
        assert_eq!(zscore(100.0, 100.0, 0.0), 0.0);
    }

    #[test]
    fn zero_variance_off_mean_is_severe() {
        assert!(zscore(101.0, 100.0, 0.0).is_infinite());
    }
}
