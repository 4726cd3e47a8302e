//! Decision counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SafetyMetrics {
    decisions: AtomicU64,
    allowed: AtomicU64,
    rejected: AtomicU64,
    human_review: AtomicU64,
    breaker_short_circuits: AtomicU64,
    analysis_failures: AtomicU64,
    fallback_analyses: AtomicU64,
    hallucinations: AtomicU64,
}

/// Serializable copy of [`SafetyMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyMetricsSnapshot {
    pub decisions: u64,
    pub allowed: u64,
    pub rejected: u64,
    pub human_review: u64,
    pub breaker_short_circuits: u64,
    pub analysis_failures: u64,
    /// Decisions made with the fallback analyzer's verdict.
    pub fallback_analyses: u64,
    pub hallucinations: u64,
}

impl SafetyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_decision(&self, allowed: bool, human_review: bool) {
        self.decisions.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        if human_review {
            self.human_review.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_short_circuit(&self) {
        self.breaker_short_circuits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_analysis_failure(&self) {
        self.analysis_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback_analysis(&self) {
        self.fallback_analyses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hallucination(&self) {
        self.hallucinations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SafetyMetricsSnapshot {
        SafetyMetricsSnapshot {
            decisions: self.decisions.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            human_review: self.human_review.load(Ordering::Relaxed),
            breaker_short_circuits: self.breaker_short_circuits.load(Ordering::Relaxed),
            analysis_failures: self.analysis_failures.load(Ordering::Relaxed),
            fallback_analyses: self.fallback_analyses.load(Ordering::Relaxed),
            hallucinations: self.hallucinations.load(Ordering::Relaxed),
        }
    }
}
