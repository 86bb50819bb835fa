//! Per-service health state machine.
//!
//! Consumes z-score pairs in sample order and decides when a service moves
//! between `INSUFFICIENT_DATA`, `STABLE`, and `DRIFT_DETECTED`:
//!
//! * severe rule — `Ksev` consecutive samples with max-|z| above `Zsev`;
//! * moderate rule — `Kmod` anomalies (max-|z| above `Zmod`) inside the
//!   trailing `Wmod`-sample window;
//! * recovery rule — `Krec` consecutive samples with max-|z| at or below
//!   `Znorm` while drifted.
//!
//! The severe rule wins when both would fire on the same sample. Any
//! transition resets every counter and both rings.

use std::collections::VecDeque;

use crate::config::DetectionConfig;
use crate::models::{ServiceState, TransitionReason, ZScorePair};

/// Result of feeding one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    NoChange,
    Transition(Transition),
}

/// An observed state change, carrying everything the audit log needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: ServiceState,
    pub to: ServiceState,
    pub reason: TransitionReason,
    /// Trailing z-score pairs up to and including the trigger sample.
    pub trigger_samples: Vec<ZScorePair>,
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    cfg: DetectionConfig,
    state: ServiceState,
    consecutive_severe: u32,
    consecutive_normal: u32,
    /// Largest max-|z| seen inside the current severe run.
    severe_run_max_z: f64,
    /// Anomaly flags (max-|z| > Zmod) for the trailing `Wmod` samples.
    anomaly_ring: VecDeque<bool>,
    /// Trailing z-score pairs retained for audit payloads.
    recent_scores: VecDeque<ZScorePair>,
}

impl StateMachine {
    pub fn new(cfg: DetectionConfig) -> Self {
        Self::restore(ServiceState::InsufficientData, cfg)
    }

    /// Rebuild a machine around a durably stored state. Counters and rings
    /// restart empty; a replayed transition stays idempotent because health
    /// upserts are keyed by service.
    pub fn restore(state: ServiceState, cfg: DetectionConfig) -> Self {
        let window = cfg.moderate_window;
        Self {
            cfg,
            state,
            consecutive_severe: 0,
            consecutive_normal: 0,
            severe_run_max_z: 0.0,
            anomaly_ring: VecDeque::with_capacity(window),
            recent_scores: VecDeque::with_capacity(window),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Fires `INSUFFICIENT_DATA → STABLE` the first time a baseline exists.
    /// Returns `None` once the machine has left the initial state.
    pub fn baseline_ready(&mut self) -> Option<Transition> {
        if self.state != ServiceState::InsufficientData {
            return None;
        }
        let from = self.state;
        self.state = ServiceState::Stable;
        self.reset();
        Some(Transition {
            from,
            to: self.state,
            reason: TransitionReason::BaselineReady,
            trigger_samples: Vec::new(),
        })
    }

    /// Feed one z-score pair, in sample order.
    pub fn observe(&mut self, pair: ZScorePair) -> StepOutcome {
        let m = pair.max_abs();

        if m > self.cfg.severe_z_threshold {
            self.consecutive_severe += 1;
            self.severe_run_max_z = self.severe_run_max_z.max(m);
        } else {
            self.consecutive_severe = 0;
            self.severe_run_max_z = 0.0;
        }

        self.anomaly_ring.push_back(m > self.cfg.moderate_z_threshold);
        while self.anomaly_ring.len() > self.cfg.moderate_window {
            self.anomaly_ring.pop_front();
        }

        if m <= self.cfg.normal_z_ceiling {
            self.consecutive_normal += 1;
        } else {
            self.consecutive_normal = 0;
        }

        self.recent_scores.push_back(pair);
        while self.recent_scores.len() > self.cfg.moderate_window {
            self.recent_scores.pop_front();
        }

        match self.state {
            ServiceState::Stable => {
                // Severe rule is checked before the moderate rule.
                if self.consecutive_severe >= self.cfg.severe_consecutive_trigger {
                    let reason = TransitionReason::ConsecutiveSevereAnomalies {
                        consecutive_count: self.consecutive_severe,
                        max_zscore: self.severe_run_max_z,
                    };
                    return StepOutcome::Transition(
                        self.transition(ServiceState::DriftDetected, reason),
                    );
                }
                let window_count = self.anomaly_ring.iter().filter(|a| **a).count();
                if window_count >= self.cfg.moderate_window_trigger {
                    let reason = TransitionReason::ModerateAnomalyDensity {
                        window_count: window_count as u32,
                        window_size: self.cfg.moderate_window as u32,
                    };
                    return StepOutcome::Transition(
                        self.transition(ServiceState::DriftDetected, reason),
                    );
                }
                StepOutcome::NoChange
            }
            ServiceState::DriftDetected => {
                if self.consecutive_normal >= self.cfg.recovery_consecutive_trigger {
                    let reason = TransitionReason::Recovery {
                        consecutive_count: self.consecutive_normal,
                    };
                    return StepOutcome::Transition(self.transition(ServiceState::Stable, reason));
                }
                StepOutcome::NoChange
            }
            // No z-driven transition before the baseline exists; counters
            // above still advanced.
            ServiceState::InsufficientData => StepOutcome::NoChange,
        }
    }

    fn transition(&mut self, to: ServiceState, reason: TransitionReason) -> Transition {
        let from = self.state;
        self.state = to;
        let trigger_samples = self.recent_scores.iter().copied().collect();
        self.reset();
        Transition {
            from,
            to,
            reason,
            trigger_samples,
        }
    }

    fn reset(&mut self) {
        self.consecutive_severe = 0;
        self.consecutive_normal = 0;
        self.severe_run_max_z = 0.0;
        self.anomaly_ring.clear();
        self.recent_scores.clear();
    }
}
