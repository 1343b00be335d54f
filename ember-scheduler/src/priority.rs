//! Priority tiers and the task envelope the scheduler actually queues.

use std::cmp::Ordering;

/// A coarse priority tier. Best-effort: higher tiers are drained from the
/// global queue first, but a running lower-priority task is never preempted
/// — priority controls start order, not completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Drained first — reserved for work known to gate the critical path.
    Critical,
    /// Drained before `Normal`.
    High,
    /// Default tier for ordinary build actions.
    Normal,
    /// Drained last.
    Low,
}

impl Priority {
    /// Index into a 4-slot multi-level queue, `Critical` first.
    #[must_use]
    pub fn tier_index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

/// A payload wrapped with the metrics the scheduler uses to order it: an
/// explicit priority tier plus the three [`ember_graph::BuildNode`]-derived
/// signals (critical-path cost, depth, dependents count) used to break ties
/// within a tier, and a monotonic sequence number as the final tiebreak.
#[derive(Debug, Clone)]
pub struct PriorityTask<T> {
    payload: T,
    priority: Priority,
    critical_path_cost: u64,
    depth: u32,
    dependents_count: u32,
    sequence: u64,
}

impl<T> PriorityTask<T> {
    /// Wrap `payload` with its scheduling metrics.
    #[must_use]
    pub fn new(payload: T, priority: Priority, critical_path_cost: u64, depth: u32, dependents_count: u32, sequence: u64) -> Self {
        Self { payload, priority, critical_path_cost, depth, dependents_count, sequence }
    }

    /// This task's priority tier.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Unwrap and return the payload, discarding scheduling metadata.
    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Borrow the payload.
    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Sort key used for ordering: tier first, then critical-path cost and
    /// dependents count (both higher-first), then sequence number
    /// (lower/earlier-first), matching the teacher's `TaskPriority` ordering
    /// generalized with an explicit priority tier ahead of it.
    fn sort_key(&self) -> (usize, u64, u32, std::cmp::Reverse<u64>) {
        (self.priority.tier_index(), self.critical_path_cost, self.dependents_count, std::cmp::Reverse(self.sequence))
    }
}

impl<T> PartialEq for PriorityTask<T> {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl<T> Eq for PriorityTask<T> {}

impl<T> PartialOrd for PriorityTask<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PriorityTask<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower tier index (higher priority) must sort "greater" so a
        // `BinaryHeap` (a max-heap) pops it first; reverse the tier
        // comparison, keep the rest ascending-is-better as computed.
        other.priority.tier_index().cmp(&self.priority.tier_index())
            .then(self.critical_path_cost.cmp(&other.critical_path_cost))
            .then(self.dependents_count.cmp(&other.dependents_count))
            .then(other.sequence.cmp(&self.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_outranks_normal_regardless_of_cost() {
        let critical = PriorityTask::new((), Priority::Critical, 1, 0, 0, 5);
        let normal = PriorityTask::new((), Priority::Normal, 1000, 0, 0, 0);
        assert!(critical > normal);
    }

    #[test]
    fn higher_critical_path_cost_wins_within_a_tier() {
        let a = PriorityTask::new((), Priority::Normal, 10, 0, 0, 0);
        let b = PriorityTask::new((), Priority::Normal, 5, 0, 0, 0);
        assert!(a > b);
    }

    #[test]
    fn earlier_sequence_wins_when_everything_else_ties() {
        let earlier = PriorityTask::new((), Priority::Normal, 1, 0, 0, 1);
        let later = PriorityTask::new((), Priority::Normal, 1, 0, 0, 2);
        assert!(earlier > later);
    }
}
