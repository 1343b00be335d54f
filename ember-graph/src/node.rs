//! The scheduler's mutable view of a [`crate::target::Target`].

use ember_digest::Digest;
use std::collections::HashSet;
use std::fmt;

/// A node identifier, equal to its target's id. A distinct newtype (rather
/// than a bare `String`) so graph APIs can't be called with an arbitrary
/// string where a node id is meant — see spec's guidance against storing
/// direct pointers between nodes in favor of an id-keyed map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a target id as a node id.
    #[must_use]
    pub fn new(target_id: impl Into<String>) -> Self {
        Self(target_id.into())
    }

    /// The underlying target id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A node's position in its strictly-forward lifecycle.
///
/// Transitions follow the total order `Pending -> Ready -> Running ->
/// {Success | Failed | Cached | Skipped}`. The four final variants are
/// terminal: once reached, a node's status never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStatus {
    /// Not all dependencies have reached a success-equivalent terminal state.
    Pending,
    /// Every dependency is Success, Cached, or Skipped; eligible to run.
    Ready,
    /// Currently executing (cache lookup or driver invocation in flight).
    Running,
    /// The action ran and produced outputs.
    Success,
    /// The action ran and failed.
    Failed,
    /// Skipped without invoking a driver, usually via `cancel_descendants`.
    Skipped,
    /// A cache hit stood in for running the action.
    Cached,
}

impl BuildStatus {
    /// Whether this status is one of the four terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed | BuildStatus::Skipped | BuildStatus::Cached)
    }

    /// Whether this status counts toward a dependent's readiness — Success,
    /// Cached, and Skipped all satisfy a downstream dependency; Failed does
    /// not (a dependent on a failed target never becomes ready on its own).
    #[must_use]
    pub fn is_success_equivalent(self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Cached | BuildStatus::Skipped)
    }
}

/// The scheduler's view of a target: status, dependency/reverse-dependency
/// sets by id, priority-feeding metrics computed at construction, and an
/// optional reference to the cache entry that satisfied it.
#[derive(Debug, Clone)]
pub struct BuildNode {
    id: NodeId,
    status: BuildStatus,
    dependencies: HashSet<NodeId>,
    dependents: HashSet<NodeId>,
    /// Monotonic sequence number assigned at creation, used only as a
    /// deterministic tiebreak when two nodes otherwise compare equal for
    /// priority purposes.
    sequence: u64,
    /// Longest path from a leaf (a node with no dependencies) to this node.
    depth: u32,
    /// Heuristic cost estimate summed along the longest downstream chain.
    critical_path_cost: u64,
    /// Number of direct dependents, cached from `dependents.len()` so
    /// priority computation doesn't repeatedly measure a `HashSet`.
    dependents_count: u32,
    /// Set once this node's result comes from a cache hit.
    cached_result: Option<Digest>,
}

impl BuildNode {
    pub(crate) fn new(id: NodeId, dependencies: HashSet<NodeId>, sequence: u64) -> Self {
        Self {
            id,
            status: BuildStatus::Pending,
            dependencies,
            dependents: HashSet::new(),
            sequence,
            depth: 0,
            critical_path_cost: 0,
            dependents_count: 0,
            cached_result: None,
        }
    }

    /// This node's id.
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> BuildStatus {
        self.status
    }

    /// Direct dependency ids.
    #[must_use]
    pub fn dependencies(&self) -> &HashSet<NodeId> {
        &self.dependencies
    }

    /// Direct dependent ids (other nodes that depend on this one).
    #[must_use]
    pub fn dependents(&self) -> &HashSet<NodeId> {
        &self.dependents
    }

    /// Monotonic creation-order sequence number, used as a priority tiebreak.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Longest path from a leaf to this node.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Heuristic cost estimate along the longest downstream chain.
    #[must_use]
    pub fn critical_path_cost(&self) -> u64 {
        self.critical_path_cost
    }

    /// Number of direct dependents.
    #[must_use]
    pub fn dependents_count(&self) -> u32 {
        self.dependents_count
    }

    /// The cached output digest that satisfied this node, if any.
    #[must_use]
    pub fn cached_result(&self) -> Option<Digest> {
        self.cached_result
    }

    pub(crate) fn set_status(&mut self, status: BuildStatus) {
        self.status = status;
    }

    pub(crate) fn set_cached_result(&mut self, digest: Digest) {
        self.cached_result = Some(digest);
    }

    pub(crate) fn add_dependent(&mut self, id: NodeId) {
        let _ = self.dependents.insert(id);
    }

    pub(crate) fn add_dependency(&mut self, id: NodeId) {
        let _ = self.dependencies.insert(id);
    }

    pub(crate) fn set_metrics(&mut self, depth: u32, critical_path_cost: u64) {
        self.depth = depth;
        self.critical_path_cost = critical_path_cost;
    }

    pub(crate) fn sync_dependents_count(&mut self) {
        self.dependents_count = self.dependents.len() as u32;
    }
}
