//! Runner metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by a [`TxnRunner`](crate::TxnRunner)
///
/// # Memory Ordering
///
/// All counters use Relaxed ordering. They are observational only and do not
/// synchronize any other memory operations.
#[derive(Debug, Default)]
pub struct RunnerMetrics {
    attempts: AtomicU64,
    committed: AtomicU64,
    no_ops: AtomicU64,
    conflicts: AtomicU64,
    exhausted: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`RunnerMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunnerStats {
    /// Builder invocations
    pub attempts: u64,
    /// Runs that committed
    pub committed: u64,
    /// Runs that finished without anything to do
    pub no_ops: u64,
    /// Attempts rejected by an assertion
    pub conflicts: u64,
    /// Runs that used up their retry budget
    pub exhausted: u64,
    /// Runs that ended in a non-conflict error
    pub failed: u64,
}

impl RunnerMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_no_op(&self) {
        self.no_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters
    pub fn stats(&self) -> RunnerStats {
        RunnerStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            no_ops: self.no_ops.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
