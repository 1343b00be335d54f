//! The build graph: static construction from a target list, readiness
//! tracking, and runtime mutation for discovered dependencies.

use crate::node::{BuildNode, BuildStatus, NodeId};
use crate::target::Target;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Errors the graph can raise at construction or mutation time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Construction found one or more cycles; names the participants of one.
    #[error("cycle detected among targets: {0:?}")]
    Cycle(Vec<NodeId>),

    /// A target declared a dependency on an id no target defines.
    #[error("target {target} depends on unknown target {dependency}")]
    UnknownDependency {
        /// The target that declared the dependency.
        target: NodeId,
        /// The dependency id that does not resolve.
        dependency: NodeId,
    },

    /// A query or mutation named a node id the graph has no record of.
    #[error("no such node: {0}")]
    UnknownNode(NodeId),

    /// A dynamic mutation would close a cycle; names the path that would form.
    #[error("dynamic edge {from} -> {to} would form a cycle: {path:?}")]
    WouldCreateCycle {
        /// Edge source.
        from: NodeId,
        /// Edge destination.
        to: NodeId,
        /// The path from `to` back to `from` that the new edge would close.
        path: Vec<NodeId>,
    },

    /// A dynamic mutation tried to add a dependency to a node already in a
    /// terminal status.
    #[error("cannot add a dependency to {0}: its status is already terminal")]
    AlreadyTerminal(NodeId),

    /// A discovered edge named a running node as its new dependency target —
    /// too late for the dependency to be honored before the dependent starts.
    #[error("discovered edge {from} -> {to} arrived too late: {to} is already running")]
    TooLate {
        /// Edge source (the new dependency).
        from: NodeId,
        /// Edge destination (the node that would depend on it).
        to: NodeId,
    },
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// One runtime discovery reported by an executing action, to be folded back
/// into the graph before the originating node's status transition.
#[derive(Debug, Clone)]
pub enum Discovery {
    /// A new dependency edge from an existing node to another existing node.
    NewEdge {
        /// The dependency (must complete before `dependent`).
        dependency: NodeId,
        /// The node that now depends on `dependency`.
        dependent: NodeId,
    },
    /// A target discovered at runtime (e.g. a generated source file that
    /// itself needs building), added as a new node with no dependents yet.
    NewNode(Target),
    /// The originating node's input set grew; carried through for whoever
    /// recomputes its `TargetKey`/`ActionKey` — the graph itself only
    /// records that the expansion happened.
    InputSetExpanded {
        /// The node whose declared inputs grew.
        node: NodeId,
        /// Number of additional inputs declared.
        added: usize,
    },
}

/// One entry in the mutation replay log, sufficient to reconstruct the graph
/// as observed after a crash.
#[derive(Debug, Clone)]
pub enum ReplayEntry {
    /// The graph was constructed from this many targets.
    Constructed {
        /// Number of targets present at construction.
        target_count: usize,
    },
    /// A status transition was applied.
    StatusChanged {
        /// The node that changed.
        node: NodeId,
        /// Its new status.
        status: BuildStatus,
    },
    /// A discovery was applied.
    Applied(Discovery),
}

struct Inner {
    nodes: HashMap<NodeId, BuildNode>,
    ready: HashSet<NodeId>,
    replay: Vec<ReplayEntry>,
}

/// A directed acyclic graph of [`BuildNode`]s, indexed by id, with a ready
/// set and a single write lock guarding every mutation.
pub struct BuildGraph {
    inner: RwLock<Inner>,
    next_sequence: std::sync::atomic::AtomicU64,
}

impl BuildGraph {
    /// Construct a graph from a flat target list.
    ///
    /// Resolves each declared dependency to a node, detects cycles with an
    /// iterative DFS, and computes depth, critical-path cost estimate, and
    /// dependents count for every node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownDependency`] if a target names a
    /// dependency no target defines, or [`GraphError::Cycle`] naming one
    /// cycle's participants.
    pub fn new(targets: Vec<Target>) -> GraphResult<Self> {
        let mut nodes: HashMap<NodeId, BuildNode> = HashMap::with_capacity(targets.len());
        let mut sequence: u64 = 0;
        let mut deps_by_id: HashMap<NodeId, Vec<NodeId>> = HashMap::with_capacity(targets.len());

        for target in &targets {
            let id = NodeId::new(target.id.clone());
            let deps: Vec<NodeId> = target.dependencies.iter().map(|d| NodeId::new(d.clone())).collect();
            let dep_set: HashSet<NodeId> = deps.iter().cloned().collect();
            let _ = nodes.insert(id.clone(), BuildNode::new(id.clone(), dep_set, sequence));
            deps_by_id.insert(id, deps);
            sequence += 1;
        }

        for (id, deps) in &deps_by_id {
            for dep in deps {
                if !nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency { target: id.clone(), dependency: dep.clone() });
                }
            }
        }

        if let Some(cycle) = find_one_cycle(&deps_by_id) {
            return Err(GraphError::Cycle(cycle));
        }

        for (id, deps) in &deps_by_id {
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.add_dependent(id.clone());
                }
            }
        }
        for node in nodes.values_mut() {
            node.sync_dependents_count();
        }

        compute_metrics(&mut nodes);

        let mut ready = HashSet::new();
        for node in nodes.values_mut() {
            if node.dependencies().is_empty() {
                node.set_status(BuildStatus::Ready);
                let _ = ready.insert(node.id().clone());
            }
        }

        let target_count = targets.len();
        Ok(Self {
            inner: RwLock::new(Inner { nodes, ready, replay: vec![ReplayEntry::Constructed { target_count }] }),
            next_sequence: std::sync::atomic::AtomicU64::new(sequence),
        })
    }

    /// Every node currently in [`BuildStatus::Ready`].
    #[must_use]
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        let inner = self.inner.read();
        inner.ready.iter().cloned().collect()
    }

    /// Direct dependents of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `id` is not in the graph.
    pub fn dependents(&self, id: &NodeId) -> GraphResult<Vec<NodeId>> {
        let inner = self.inner.read();
        let node = inner.nodes.get(id).ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
        Ok(node.dependents().iter().cloned().collect())
    }

    /// A snapshot of one node's current state, or `None` if unknown.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<BuildNode> {
        self.inner.read().nodes.get(id).cloned()
    }

    /// Every node id currently in the graph, in no particular order. Used
    /// by callers that need to enumerate the whole graph (e.g. a `query`
    /// surface resolving `deps`/`rdeps` for an arbitrary target) rather than
    /// just its ready frontier.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner.read().nodes.keys().cloned().collect()
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    /// Move `id` to `status`. If `status` is terminal and success-equivalent,
    /// direct dependents are re-scanned under this same write lock and any
    /// whose remaining dependency count has dropped to zero move to `Ready`.
    ///
    /// Returns the ids of dependents *this call* promoted to `Ready` — since
    /// the promotion check (all dependencies success-equivalent) only ever
    /// fires once per node (guarded by `status == Pending`, and status only
    /// moves forward), two racing callers completing a shared dependent's
    /// two different dependencies can never both receive the same id here:
    /// whichever call observes the last outstanding dependency complete
    /// under this write lock is the sole one to see it promoted. Callers
    /// (the executor) use this to submit exactly one task per newly-ready
    /// node, with no separate readiness poll needed.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `id` is not in the graph.
    pub fn mark_status(&self, id: &NodeId, status: BuildStatus) -> GraphResult<Vec<NodeId>> {
        let mut inner = self.inner.write();
        if !inner.nodes.contains_key(id) {
            return Err(GraphError::UnknownNode(id.clone()));
        }
        {
            let node = inner.nodes.get_mut(id).expect("checked above");
            node.set_status(status);
        }
        let _ = inner.ready.remove(id);
        inner.replay.push(ReplayEntry::StatusChanged { node: id.clone(), status });

        let mut newly_ready = Vec::new();
        if status.is_success_equivalent() {
            let dependents: Vec<NodeId> = inner.nodes.get(id).expect("checked above").dependents().iter().cloned().collect();
            for dependent_id in dependents {
                let is_ready = {
                    let dependent = match inner.nodes.get(&dependent_id) {
                        Some(n) => n,
                        None => continue,
                    };
                    dependent.status() == BuildStatus::Pending
                        && dependent
                            .dependencies()
                            .iter()
                            .all(|dep_id| inner.nodes.get(dep_id).is_some_and(|d| d.status().is_success_equivalent()))
                };
                if is_ready {
                    if let Some(dependent) = inner.nodes.get_mut(&dependent_id) {
                        dependent.set_status(BuildStatus::Ready);
                    }
                    let _ = inner.ready.insert(dependent_id.clone());
                    inner.replay.push(ReplayEntry::StatusChanged { node: dependent_id.clone(), status: BuildStatus::Ready });
                    newly_ready.push(dependent_id);
                }
            }
        }
        Ok(newly_ready)
    }

    /// Record that `id`'s result came from a cache hit, without itself
    /// changing status — callers typically follow with
    /// `mark_status(id, BuildStatus::Cached)`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `id` is not in the graph.
    pub fn set_cached_result(&self, id: &NodeId, digest: ember_digest::Digest) -> GraphResult<()> {
        let mut inner = self.inner.write();
        let node = inner.nodes.get_mut(id).ok_or_else(|| GraphError::UnknownNode(id.clone()))?;
        node.set_cached_result(digest);
        Ok(())
    }

    /// Mark the entire downstream subgraph of `id` (not including `id`
    /// itself) `Skipped`, without invoking any driver. Used when a node
    /// fails and the failure-propagation policy cancels its dependents.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] if `id` is not in the graph.
    pub fn cancel_descendants(&self, id: &NodeId) -> GraphResult<Vec<NodeId>> {
        let mut inner = self.inner.write();
        if !inner.nodes.contains_key(id) {
            return Err(GraphError::UnknownNode(id.clone()));
        }
        let mut cancelled = Vec::new();
        let mut queue: VecDeque<NodeId> = inner.nodes.get(id).expect("checked above").dependents().iter().cloned().collect();
        let mut seen: HashSet<NodeId> = HashSet::new();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(node) = inner.nodes.get_mut(&next) {
                if !node.status().is_terminal() {
                    node.set_status(BuildStatus::Skipped);
                    let _ = inner.ready.remove(&next);
                    inner.replay.push(ReplayEntry::StatusChanged { node: next.clone(), status: BuildStatus::Skipped });
                    cancelled.push(next.clone());
                }
                for dependent in node.dependents().iter().cloned() {
                    queue.push_back(dependent);
                }
            }
        }
        Ok(cancelled)
    }

    /// Apply a batch of runtime discoveries under one write lock.
    ///
    /// Each discovery is validated independently; the whole batch is applied
    /// atomically with respect to other mutators, but a rejected discovery
    /// does not roll back discoveries already applied earlier in the same
    /// call — callers that need all-or-nothing semantics should validate
    /// with a dry run first.
    ///
    /// # Errors
    ///
    /// Returns the first violation encountered: [`GraphError::WouldCreateCycle`],
    /// [`GraphError::AlreadyTerminal`], [`GraphError::TooLate`], or
    /// [`GraphError::UnknownNode`] for an edge naming a node that does not
    /// (yet) exist.
    pub fn extend(&self, discoveries: Vec<Discovery>) -> GraphResult<()> {
        let mut inner = self.inner.write();
        for discovery in discoveries {
            apply_discovery(&mut inner, discovery.clone(), &self.next_sequence)?;
            inner.replay.push(ReplayEntry::Applied(discovery));
        }
        Ok(())
    }

    /// The full mutation replay log recorded so far, for crash recovery.
    #[must_use]
    pub fn replay_log(&self) -> Vec<ReplayEntry> {
        self.inner.read().replay.clone()
    }
}

fn apply_discovery(inner: &mut Inner, discovery: Discovery, next_sequence: &std::sync::atomic::AtomicU64) -> GraphResult<()> {
    match discovery {
        Discovery::NewNode(target) => {
            let id = NodeId::new(target.id.clone());
            if inner.nodes.contains_key(&id) {
                return Ok(());
            }
            let deps: HashSet<NodeId> = target.dependencies.iter().map(|d| NodeId::new(d.clone())).collect();
            for dep in &deps {
                if !inner.nodes.contains_key(dep) {
                    return Err(GraphError::UnknownNode(dep.clone()));
                }
            }
            let seq = next_sequence.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut node = BuildNode::new(id.clone(), deps.clone(), seq);
            if deps.is_empty() {
                node.set_status(BuildStatus::Ready);
                let _ = inner.ready.insert(id.clone());
            }
            let _ = inner.nodes.insert(id.clone(), node);
            for dep in &deps {
                if let Some(dep_node) = inner.nodes.get_mut(dep) {
                    dep_node.add_dependent(id.clone());
                    dep_node.sync_dependents_count();
                }
            }
            Ok(())
        }
        Discovery::NewEdge { dependency, dependent } => {
            if !inner.nodes.contains_key(&dependency) {
                return Err(GraphError::UnknownNode(dependency));
            }
            let dependent_status = inner
                .nodes
                .get(&dependent)
                .ok_or_else(|| GraphError::UnknownNode(dependent.clone()))?
                .status();

            if dependent_status.is_terminal() {
                return Err(GraphError::AlreadyTerminal(dependent));
            }
            if dependent_status == BuildStatus::Running {
                return Err(GraphError::TooLate { from: dependency, to: dependent });
            }
            if inner.nodes.get(&dependency).is_some_and(|d| d.status().is_success_equivalent()) {
                return Ok(());
            }
            // A cycle forms iff `dependency` already (transitively) depends
            // on `dependent` — walk `dependency`'s own dependency chain.
            if let Some(path) = reachable_path(inner, &dependency, &dependent) {
                return Err(GraphError::WouldCreateCycle { from: dependency, to: dependent, path });
            }

            if let Some(node) = inner.nodes.get_mut(&dependent) {
                node.add_dependency(dependency.clone());
                node.set_status(BuildStatus::Pending);
            }
            let _ = inner.ready.remove(&dependent);
            if let Some(dep_node) = inner.nodes.get_mut(&dependency) {
                dep_node.add_dependent(dependent);
                dep_node.sync_dependents_count();
            }
            Ok(())
        }
        Discovery::InputSetExpanded { node, added: _ } => {
            if !inner.nodes.contains_key(&node) {
                return Err(GraphError::UnknownNode(node));
            }
            Ok(())
        }
    }
}

/// BFS reachability from `start` to `target` over outgoing "depends on"
/// edges (i.e. `start`'s dependencies, transitively). Returns the path if
/// reachable — used to detect that a proposed `dependency -> dependent` edge
/// would close a cycle (`dependent` can already reach `dependency`).
fn reachable_path(inner: &Inner, start: &NodeId, target: &NodeId) -> Option<Vec<NodeId>> {
    if start == target {
        return Some(vec![start.clone()]);
    }
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut queue: VecDeque<Vec<NodeId>> = VecDeque::new();
    queue.push_back(vec![start.clone()]);
    let _ = visited.insert(start.clone());
    while let Some(path) = queue.pop_front() {
        let last = path.last().expect("path is never empty");
        if let Some(node) = inner.nodes.get(last) {
            for dep in node.dependencies() {
                if dep == target {
                    let mut full = path.clone();
                    full.push(dep.clone());
                    return Some(full);
                }
                if visited.insert(dep.clone()) {
                    let mut next = path.clone();
                    next.push(dep.clone());
                    queue.push_back(next);
                }
            }
        }
    }
    None
}

/// Iterative DFS cycle detection over the dependency map. Returns the node
/// ids of one cycle, if any exist.
fn find_one_cycle(deps_by_id: &HashMap<NodeId, Vec<NodeId>>) -> Option<Vec<NodeId>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: HashMap<NodeId, Mark> = HashMap::new();
    let mut order: Vec<NodeId> = deps_by_id.keys().cloned().collect();
    order.sort();

    for start in &order {
        if marks.contains_key(start) {
            continue;
        }
        // Stack of (node, next-dependency-index-to-visit).
        let mut stack: Vec<(NodeId, usize)> = vec![(start.clone(), 0)];
        let mut path: Vec<NodeId> = vec![start.clone()];
        let _ = marks.insert(start.clone(), Mark::InProgress);

        while let Some((node, idx)) = stack.last().cloned() {
            let deps = deps_by_id.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            if idx >= deps.len() {
                let _ = marks.insert(node.clone(), Mark::Done);
                let _ = stack.pop();
                let _ = path.pop();
                continue;
            }
            let next = deps[idx].clone();
            stack.last_mut().expect("just checked non-empty").1 += 1;

            match marks.get(&next) {
                Some(Mark::Done) => {}
                Some(Mark::InProgress) => {
                    let cycle_start = path.iter().position(|n| n == &next).unwrap_or(0);
                    let mut cycle = path[cycle_start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                None => {
                    let _ = marks.insert(next.clone(), Mark::InProgress);
                    path.push(next.clone());
                    stack.push((next, 0));
                }
            }
        }
    }
    None
}

/// Compute depth (longest path from a leaf) and a heuristic critical-path
/// cost estimate for every node, in one reverse-topological pass. Each
/// node's unit cost is fixed at 1; `critical_path_cost` is the length of the
/// longest downstream chain starting at this node (inclusive).
fn compute_metrics(nodes: &mut HashMap<NodeId, BuildNode>) {
    let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::with_capacity(nodes.len());
    let mut in_degree: HashMap<NodeId, usize> = HashMap::with_capacity(nodes.len());
    for (id, node) in nodes.iter() {
        in_degree.insert(id.clone(), node.dependencies().len());
        for dep in node.dependencies() {
            dependents.entry(dep.clone()).or_default().push(id.clone());
        }
    }

    let mut depth: HashMap<NodeId, u32> = HashMap::with_capacity(nodes.len());
    let mut queue: VecDeque<NodeId> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(id, _)| id.clone()).collect();
    let mut remaining = in_degree.clone();
    for id in &queue {
        depth.insert(id.clone(), 0);
    }
    while let Some(id) = queue.pop_front() {
        let d = *depth.get(&id).unwrap_or(&0);
        if let Some(outs) = dependents.get(&id) {
            for out in outs {
                let entry = depth.entry(out.clone()).or_insert(0);
                *entry = (*entry).max(d + 1);
                if let Some(rem) = remaining.get_mut(out) {
                    *rem -= 1;
                    if *rem == 0 {
                        queue.push_back(out.clone());
                    }
                }
            }
        }
    }

    let mut cost: HashMap<NodeId, u64> = HashMap::with_capacity(nodes.len());
    let mut order: Vec<NodeId> = depth.keys().cloned().collect();
    order.sort_by_key(|id| std::cmp::Reverse(depth.get(id).copied().unwrap_or(0)));
    for id in order {
        let best_downstream = dependents.get(&id).map(|outs| outs.iter().filter_map(|o| cost.get(o).copied()).max().unwrap_or(0)).unwrap_or(0);
        cost.insert(id, best_downstream + 1);
    }

    for (id, node) in nodes.iter_mut() {
        node.set_metrics(depth.get(id).copied().unwrap_or(0), cost.get(id).copied().unwrap_or(1));
    }
}
