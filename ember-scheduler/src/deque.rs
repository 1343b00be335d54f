//! Per-worker deques and random-victim steal selection.
//!
//! Each worker owns a [`crossbeam_deque::Worker`] (push/pop at the bottom,
//! wait-free for the owner) and publishes a [`crossbeam_deque::Stealer`]
//! (steals from the top via a single CAS) that every other worker may poll.
//! `crossbeam-deque` is the Chase–Lev deque the spec names as the canonical
//! choice; we don't reimplement the CAS protocol, only the victim-selection
//! policy around it.

use crate::priority::PriorityTask;
use crossbeam_deque::{Steal, Stealer, Worker};
use rand::seq::SliceRandom;
use rand::thread_rng;

/// One worker's local deque: owned push/pop handle plus the `Stealer`
/// handles every *other* worker uses to steal from this one.
pub struct WorkerDeque<T> {
    local: Worker<PriorityTask<T>>,
}

impl<T> Default for WorkerDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkerDeque<T> {
    /// A new, empty deque with unbounded growth (overflowing to the global
    /// queue is the caller's responsibility, not this type's — see
    /// `DESIGN.md` on why a fixed-capacity ring buffer was not chosen).
    #[must_use]
    pub fn new() -> Self {
        Self { local: Worker::new_lifo() }
    }

    /// A `Stealer` handle other workers use to steal from this deque's top.
    #[must_use]
    pub fn stealer(&self) -> Stealer<PriorityTask<T>> {
        self.local.stealer()
    }

    /// Push to the bottom. Wait-free; only the owning worker calls this.
    pub fn push(&self, task: PriorityTask<T>) {
        self.local.push(task);
    }

    /// Pop from the bottom (LIFO — the task pushed most recently locally
    /// comes back first). Wait-free; only the owning worker calls this.
    pub fn pop(&self) -> Option<PriorityTask<T>> {
        self.local.pop()
    }

    /// Current number of tasks, used by victim selection to prefer the
    /// deepest peer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.local.len()
    }

    /// Whether this deque is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }
}

/// Attempt up to `attempts` steals. Each attempt samples up to 3 random
/// peers (excluding `self_index`) and targets the deepest one; a CAS
/// collision aborts that attempt without an immediate retry against the
/// same victim (the caller's next loop iteration may resample).
///
/// Returns the stolen task, or `None` if every attempt failed — either
/// because all sampled peers were empty or because every non-empty sample's
/// steal lost its CAS race.
pub fn try_steal<T>(stealers: &[Stealer<PriorityTask<T>>], self_index: usize, attempts: u32, aborted: &std::sync::atomic::AtomicU64) -> Option<PriorityTask<T>> {
    if stealers.len() <= 1 {
        return None;
    }
    let mut rng = thread_rng();
    let mut candidates: Vec<usize> = (0..stealers.len()).filter(|&i| i != self_index).collect();

    for _ in 0..attempts {
        candidates.shuffle(&mut rng);
        let sample_len = candidates.len().min(3);
        let Some(&victim) = candidates[..sample_len]
            .iter()
            .max_by_key(|&&i| stealers[i].len())
        else {
            return None;
        };

        match stealers[victim].steal() {
            Steal::Success(task) => return Some(task),
            Steal::Empty => {}
            Steal::Retry => {
                aborted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::Priority;

    #[test]
    fn local_push_pop_is_lifo() {
        let deque: WorkerDeque<i32> = WorkerDeque::new();
        deque.push(PriorityTask::new(1, Priority::Normal, 0, 0, 0, 0));
        deque.push(PriorityTask::new(2, Priority::Normal, 0, 0, 0, 1));
        assert_eq!(deque.pop().map(PriorityTask::into_payload), Some(2));
        assert_eq!(deque.pop().map(PriorityTask::into_payload), Some(1));
        assert!(deque.pop().is_none());
    }

    #[test]
    fn steal_picks_up_a_task_from_a_peer() {
        let a: WorkerDeque<i32> = WorkerDeque::new();
        let b: WorkerDeque<i32> = WorkerDeque::new();
        b.push(PriorityTask::new(42, Priority::Normal, 0, 0, 0, 0));
        let stealers = vec![a.stealer(), b.stealer()];
        let aborted = std::sync::atomic::AtomicU64::new(0);
        let stolen = try_steal(&stealers, 0, 8, &aborted);
        assert_eq!(stolen.map(PriorityTask::into_payload), Some(42));
    }

    #[test]
    fn steal_against_all_empty_peers_returns_none() {
        let a: WorkerDeque<i32> = WorkerDeque::new();
        let b: WorkerDeque<i32> = WorkerDeque::new();
        let stealers = vec![a.stealer(), b.stealer()];
        let aborted = std::sync::atomic::AtomicU64::new(0);
        assert!(try_steal(&stealers, 0, 4, &aborted).is_none());
    }

    #[test]
    fn single_worker_has_no_steal_candidates() {
        let a: WorkerDeque<i32> = WorkerDeque::new();
        let stealers = vec![a.stealer()];
        let aborted = std::sync::atomic::AtomicU64::new(0);
        assert!(try_steal(&stealers, 0, 4, &aborted).is_none());
    }
}
