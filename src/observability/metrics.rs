//! Recovery metrics
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for the recovery coordinator
///
/// All counters use Relaxed ordering; readers only need eventual values.
#[derive(Debug, Default)]
pub struct RecoveryMetrics {
    /// Attempts created
    recoveries_started: AtomicU64,
    /// Attempts where every partition was recovered
    recoveries_completed: AtomicU64,
    /// Attempts that finished with some partition unrecovered
    recoveries_incomplete: AtomicU64,
    /// Attempts that ended before assigning masters
    recoveries_aborted: AtomicU64,
    /// Segment inventory requests sent
    backup_queries_sent: AtomicU64,
    /// Segment inventory requests that failed
    backup_queries_failed: AtomicU64,
    /// Partitions reported recovered
    partitions_recovered: AtomicU64,
    /// Partitions reported failed or left unassigned
    partitions_failed: AtomicU64,
    /// Assignments sent to recovery masters
    assignments_sent: AtomicU64,
    /// Assignments that could not be delivered
    assignments_failed: AtomicU64,
    /// Completion notices sent to backups
    broadcasts_sent: AtomicU64,
}

impl RecoveryMetrics {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_recoveries_started(&self) {
        self.recoveries_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_recoveries_completed(&self) {
        self.recoveries_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_recoveries_incomplete(&self) {
        self.recoveries_incomplete.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_recoveries_aborted(&self) {
        self.recoveries_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_backup_queries_sent(&self) {
        self.backup_queries_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_backup_queries_failed(&self) {
        self.backup_queries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_partitions_recovered(&self) {
        self.partitions_recovered.fetch_add(1, Ordering::Relaxed);
    }

    /// Partitions can fail in bulk when masters run out.
    pub fn add_partitions_failed(&self, count: u64) {
        self.partitions_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_assignments_sent(&self) {
        self.assignments_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_assignments_failed(&self) {
        self.assignments_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_broadcasts_sent(&self) {
        self.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            recoveries_started: self.recoveries_started.load(Ordering::Relaxed),
            recoveries_completed: self.recoveries_completed.load(Ordering::Relaxed),
            recoveries_incomplete: self.recoveries_incomplete.load(Ordering::Relaxed),
            recoveries_aborted: self.recoveries_aborted.load(Ordering::Relaxed),
            backup_queries_sent: self.backup_queries_sent.load(Ordering::Relaxed),
            backup_queries_failed: self.backup_queries_failed.load(Ordering::Relaxed),
            partitions_recovered: self.partitions_recovered.load(Ordering::Relaxed),
            partitions_failed: self.partitions_failed.load(Ordering::Relaxed),
            assignments_sent: self.assignments_sent.load(Ordering::Relaxed),
            assignments_failed: self.assignments_failed.load(Ordering::Relaxed),
            broadcasts_sent: self.broadcasts_sent.load(Ordering::Relaxed),
        }
    }

    /// Current snapshot as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub recoveries_started: u64,
    pub recoveries_completed: u64,
    pub recoveries_incomplete: u64,
    pub recoveries_aborted: u64,
    pub backup_queries_sent: u64,
    pub backup_queries_failed: u64,
    pub partitions_recovered: u64,
    pub partitions_failed: u64,
    pub assignments_sent: u64,
    pub assignments_failed: u64,
    pub broadcasts_sent: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let metrics = RecoveryMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_increment_counters() {
        let metrics = RecoveryMetrics::new();

        metrics.increment_recoveries_started();
        metrics.increment_recoveries_started();
        metrics.increment_backup_queries_sent();
        metrics.increment_backup_queries_failed();
        metrics.add_partitions_failed(3);
        metrics.increment_partitions_recovered();
        metrics.increment_broadcasts_sent();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.recoveries_started, 2);
        assert_eq!(snapshot.backup_queries_sent, 1);
        assert_eq!(snapshot.backup_queries_failed, 1);
        assert_eq!(snapshot.partitions_failed, 3);
        assert_eq!(snapshot.partitions_recovered, 1);
        assert_eq!(snapshot.broadcasts_sent, 1);
    }

    #[test]
    fn test_to_json() {
        let metrics = RecoveryMetrics::new();
        metrics.increment_assignments_sent();

        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["assignments_sent"], 1);
        assert_eq!(parsed["broadcasts_sent"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(RecoveryMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.increment_backup_queries_sent();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot().backup_queries_sent, 800);
    }
}
