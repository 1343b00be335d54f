//! Per-worker and aggregate scheduler counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for one worker thread, updated only by that thread
/// (except `deque_depth`, which is read opportunistically by others during
/// victim selection and by `get_stats`).
#[derive(Default)]
pub struct WorkerCounters {
    pub(crate) executed: AtomicU64,
    pub(crate) stolen_from_others: AtomicU64,
    pub(crate) steal_attempts: AtomicU64,
    pub(crate) steal_aborts: AtomicU64,
}

/// A point-in-time snapshot of one worker's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    /// Tasks this worker has run to completion.
    pub executed: u64,
    /// Tasks this worker picked up by stealing from a peer.
    pub stolen_from_others: u64,
    /// Total steal attempts this worker has made.
    pub steal_attempts: u64,
    /// Steal attempts that aborted on a CAS collision.
    pub steal_aborts: u64,
    /// Current number of tasks sitting in this worker's local deque.
    pub deque_depth: usize,
}

/// Aggregate scheduler statistics: one [`WorkerStats`] per worker plus
/// totals, matching §4.6's "per-worker and aggregate counters".
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Per-worker breakdown, indexed by worker id.
    pub workers: Vec<WorkerStats>,
    /// Total tasks executed across all workers.
    pub total_executed: u64,
    /// Total tasks picked up via a successful steal.
    pub total_stolen: u64,
    /// Total steal attempts across all workers.
    pub total_steal_attempts: u64,
}

impl SchedulerStats {
    /// Fraction of steal attempts that succeeded, in `[0.0, 1.0]`.
    #[must_use]
    pub fn steal_success_rate(&self) -> f64 {
        if self.total_steal_attempts == 0 {
            0.0
        } else {
            self.total_stolen as f64 / self.total_steal_attempts as f64
        }
    }
}

impl WorkerCounters {
    pub(crate) fn snapshot(&self, deque_depth: usize) -> WorkerStats {
        WorkerStats {
            executed: self.executed.load(Ordering::Relaxed),
            stolen_from_others: self.stolen_from_others.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
            steal_aborts: self.steal_aborts.load(Ordering::Relaxed),
            deque_depth,
        }
    }
}
