//! Counters for the regulation loop.
//!
//! Plain `AtomicU64` counters, readable as a serializable snapshot for
//! whatever exporter the host runs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Thread-safe counters updated by the regulator.
#[derive(Debug, Default)]
pub struct RegulationMetrics {
    cycles: AtomicU64,
    models_measured: AtomicU64,
    model_failures: AtomicU64,
    abnormal_verdicts: AtomicU64,
    degrades: AtomicU64,
    restore_steps: AtomicU64,
    recoveries: AtomicU64,
    cap_blocks: AtomicU64,
    evictions: AtomicU64,
    weight_failures: AtomicU64,
}

/// Point-in-time copy of [`RegulationMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulationMetricsSnapshot {
    /// Regulation cycles completed.
    pub cycles: u64,
    /// Model passes that completed.
    pub models_measured: u64,
    /// Model passes that failed or panicked.
    pub model_failures: u64,
    /// Abnormal verdicts seen while degrading was effective.
    pub abnormal_verdicts: u64,
    /// Providers degraded.
    pub degrades: u64,
    /// Restore steps applied.
    pub restore_steps: u64,
    /// Providers back at origin weight and out of the degrade list.
    pub recoveries: u64,
    /// Degrades skipped because the service was at its cap.
    pub cap_blocks: u64,
    /// Idle stats evicted.
    pub evictions: u64,
    /// Degrade or restore calls the weight store rejected.
    pub weight_failures: u64,
}

impl RegulationMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a finished regulation cycle.
    #[inline]
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a model pass that completed.
    #[inline]
    pub fn record_model_measured(&self) {
        self.models_measured.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a model pass that panicked.
    #[inline]
    pub fn record_model_failure(&self) {
        self.model_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an abnormal verdict.
    #[inline]
    pub fn record_abnormal(&self) {
        self.abnormal_verdicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a degraded provider.
    #[inline]
    pub fn record_degrade(&self) {
        self.degrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one restore step.
    #[inline]
    pub fn record_restore_step(&self) {
        self.restore_steps.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a provider back at origin weight.
    #[inline]
    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a degrade skipped at the service cap.
    #[inline]
    pub fn record_cap_block(&self) {
        self.cap_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts `count` evicted idle stats.
    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Counts a degrade or restore the weight store rejected.
    #[inline]
    pub fn record_weight_failure(&self) {
        self.weight_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> RegulationMetricsSnapshot {
        RegulationMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            models_measured: self.models_measured.load(Ordering::Relaxed),
            model_failures: self.model_failures.load(Ordering::Relaxed),
            abnormal_verdicts: self.abnormal_verdicts.load(Ordering::Relaxed),
            degrades: self.degrades.load(Ordering::Relaxed),
            restore_steps: self.restore_steps.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            cap_blocks: self.cap_blocks.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            weight_failures: self.weight_failures.load(Ordering::Relaxed),
        }
    }
}
