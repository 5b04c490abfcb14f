//! Cheap counter set logged periodically for observability (S3/§3.1). Never
//! read by scheduling logic: purely a side channel for operators, the way
//! the teacher's `protocol_metrics` are collected and handed to a metrics
//! logger task on a fixed interval without influencing the protocol itself.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct WorkerMetrics {
    pub tasks_finished: AtomicU64,
    pub tasks_erred: AtomicU64,
    pub deps_fetched: AtomicU64,
    pub deps_poisoned: AtomicU64,
    pub bytes_gathered: AtomicU64,
    pub gather_rounds: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_finished: u64,
    pub tasks_erred: u64,
    pub deps_fetched: u64,
    pub deps_poisoned: u64,
    pub bytes_gathered: u64,
    pub gather_rounds: u64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_finished: self.tasks_finished.load(Ordering::Relaxed),
            tasks_erred: self.tasks_erred.load(Ordering::Relaxed),
            deps_fetched: self.deps_fetched.load(Ordering::Relaxed),
            deps_poisoned: self.deps_poisoned.load(Ordering::Relaxed),
            bytes_gathered: self.bytes_gathered.load(Ordering::Relaxed),
            gather_rounds: self.gather_rounds.load(Ordering::Relaxed),
        }
    }

    pub fn incr_tasks_finished(&self) {
        self.tasks_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_tasks_erred(&self) {
        self.tasks_erred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_deps_fetched(&self, bytes: u64) {
        self.deps_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_gathered.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn incr_deps_poisoned(&self) {
        self.deps_poisoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_gather_rounds(&self) {
        self.gather_rounds.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = WorkerMetrics::new();
        metrics.incr_tasks_finished();
        metrics.incr_deps_fetched(128);
        let snap = metrics.snapshot();
        assert_eq!(snap.tasks_finished, 1);
        assert_eq!(snap.deps_fetched, 1);
        assert_eq!(snap.bytes_gathered, 128);
    }
}
