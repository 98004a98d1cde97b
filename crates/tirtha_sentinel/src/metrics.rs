//! Process-local counters.
//!
//! Lock-free atomics; each worker process keeps its own numbers and logs a
//! summary when its dispatch loop exits.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance - lock-free atomics for counters
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // Queue
    pub tasks_claimed: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_retried: AtomicU64,

    // Gates
    pub gate_failures: AtomicU64,
    pub prerun_rejections: AtomicU64,

    // Runs
    pub runs_started: AtomicU64,
    pub runs_done: AtomicU64,
    pub runs_failed: AtomicU64,
    pub runs_reaped: AtomicU64,

    // Identifiers
    pub arks_minted: AtomicU64,
    pub ark_collisions: AtomicU64,

    pub notification_failures: AtomicU64,
    pub replacements: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tasks_claimed: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_retried: AtomicU64::new(0),
            gate_failures: AtomicU64::new(0),
            prerun_rejections: AtomicU64::new(0),
            runs_started: AtomicU64::new(0),
            runs_done: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_reaped: AtomicU64::new(0),
            arks_minted: AtomicU64::new(0),
            ark_collisions: AtomicU64::new(0),
            notification_failures: AtomicU64::new(0),
            replacements: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_tasks_claimed(&self) {
        self.tasks_claimed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_tasks_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_tasks_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_tasks_retried(&self) {
        self.tasks_retried.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_gate_failures(&self) {
        self.gate_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_prerun_rejections(&self) {
        self.prerun_rejections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_runs_done(&self) {
        self.runs_done.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_runs_reaped(&self) {
        self.runs_reaped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_arks_minted(&self) {
        self.arks_minted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_ark_collisions(&self) {
        self.ark_collisions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_notification_failures(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_replacements(&self) {
        self.replacements.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_claimed: self.tasks_claimed.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            gate_failures: self.gate_failures.load(Ordering::Relaxed),
            prerun_rejections: self.prerun_rejections.load(Ordering::Relaxed),
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_done: self.runs_done.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_reaped: self.runs_reaped.load(Ordering::Relaxed),
            arks_minted: self.arks_minted.load(Ordering::Relaxed),
            ark_collisions: self.ark_collisions.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of metrics for reading
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_claimed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub gate_failures: u64,
    pub prerun_rejections: u64,
    pub runs_started: u64,
    pub runs_done: u64,
    pub runs_failed: u64,
    pub runs_reaped: u64,
    pub arks_minted: u64,
    pub ark_collisions: u64,
    pub notification_failures: u64,
    pub replacements: u64,
}

impl MetricsSnapshot {
    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Tasks: {} claimed, {} completed, {} failed, {} retried | \
             Runs: {} started, {} done, {} failed, {} reaped | \
             Gates: {} ingestion failures, {} prerun rejections | \
             ARKs: {} minted, {} collisions | \
             {} notification failures, {} replacements",
            self.tasks_claimed,
            self.tasks_completed,
            self.tasks_failed,
            self.tasks_retried,
            self.runs_started,
            self.runs_done,
            self.runs_failed,
            self.runs_reaped,
            self.gate_failures,
            self.prerun_rejections,
            self.arks_minted,
            self.ark_collisions,
            self.notification_failures,
            self.replacements,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();
        metrics.inc_tasks_claimed();
        metrics.inc_tasks_claimed();
        metrics.inc_ark_collisions();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_claimed, 2);
        assert_eq!(snapshot.ark_collisions, 1);
        assert_eq!(snapshot.runs_done, 0);
    }

    #[test]
    fn test_summary_mentions_counters() {
        let metrics = Metrics::new();
        metrics.inc_runs_reaped();
        let summary = metrics.snapshot().summary();
        assert!(summary.contains("1 reaped"));
    }
}
