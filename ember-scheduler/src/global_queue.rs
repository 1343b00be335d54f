//! The scheduler's shared multi-level priority queue.
//!
//! External submissions land here by default, regardless of which worker is
//! idle first. A worker drains a batch under the mutex when its own deque
//! runs dry, so a higher-tier task that arrives while every worker is busy
//! is still picked up promptly once one frees up.

use crate::priority::{Priority, PriorityTask};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

const TIER_COUNT: usize = 4;

struct Tiers<T> {
    slots: [VecDeque<PriorityTask<T>>; TIER_COUNT],
    stopping: bool,
}

impl<T> Tiers<T> {
    fn len(&self) -> usize {
        self.slots.iter().map(VecDeque::len).sum()
    }
}

/// A mutex + condvar guarded queue with four priority tiers, drained
/// highest-tier-first.
pub struct GlobalQueue<T> {
    tiers: Mutex<Tiers<T>>,
    condvar: Condvar,
}

impl<T> Default for GlobalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> GlobalQueue<T> {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tiers: Mutex::new(Tiers {
                slots: [VecDeque::new(), VecDeque::new(), VecDeque::new(), VecDeque::new()],
                stopping: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Push a task into its priority tier and wake one waiting worker.
    pub fn push(&self, task: PriorityTask<T>) {
        let mut tiers = self.tiers.lock();
        tiers.slots[task.priority().tier_index()].push_back(task);
        self.condvar.notify_one();
    }

    /// Pop up to `max` tasks, highest tier first, without blocking.
    pub fn try_drain_batch(&self, max: usize) -> Vec<PriorityTask<T>> {
        let mut tiers = self.tiers.lock();
        let mut batch = Vec::with_capacity(max);
        'tiers: for slot in &mut tiers.slots {
            while batch.len() < max {
                let Some(task) = slot.pop_front() else { break };
                batch.push(task);
                if batch.len() == max {
                    break 'tiers;
                }
            }
        }
        batch
    }

    /// Block until at least one task is available or the queue is stopped,
    /// then drain up to `max` of them. Returns an empty vec only when
    /// stopped with nothing left to drain.
    pub fn drain_batch_blocking(&self, max: usize) -> Vec<PriorityTask<T>> {
        let mut tiers = self.tiers.lock();
        loop {
            let batch = drain_locked(&mut tiers, max);
            if !batch.is_empty() || tiers.stopping {
                return batch;
            }
            self.condvar.wait(&mut tiers);
        }
    }

    /// Total tasks queued across all tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiers.lock().len()
    }

    /// Whether every tier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signal shutdown and wake every waiter so they observe the flag.
    pub fn stop(&self) {
        let mut tiers = self.tiers.lock();
        tiers.stopping = true;
        self.condvar.notify_all();
    }
}

fn drain_locked<T>(tiers: &mut Tiers<T>, max: usize) -> Vec<PriorityTask<T>> {
    let mut batch = Vec::with_capacity(max);
    'tiers: for slot in &mut tiers.slots {
        while batch.len() < max {
            let Some(task) = slot.pop_front() else { break };
            batch.push(task);
            if batch.len() == max {
                break 'tiers;
            }
        }
    }
    batch
}
