//! The per-node execution path (§4.6): cache lookups at both granularities,
//! sandboxed driver invocation with retry, a dynamic-discovery flush, and
//! the graph status transition that follows either outcome.
//!
//! Grounded in the teacher's `convenient-bitbake::executor` dispatch loop,
//! generalized from "run a task closure, report its result" to the five-step
//! cache-then-build pipeline this core's design notes describe: target-cache
//! check, action-cache check, sandboxed invocation, discovery flush, record
//! and transition.

use crate::driver::{DriverRegistry, InvokeOutcome, LanguageDriver};
use crate::events::{BuildEvent, BuildEventSubscriber};
use crate::retry::{ErrorKind, RetryPolicy};
use ember_cache::{Artifact, CacheCoordinator, CacheEntry};
use ember_digest::{ContentHasher, Digest};
use ember_graph::{BuildGraph, BuildStatus, Discovery, NodeId, Target};
use ember_sandbox::{NetworkPolicy, ResourceLimits, SandboxBuilder};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Default wall-clock timeout applied to a constructed [`ember_sandbox::HermeticSpec`]
/// when a target's configuration does not override it.
pub const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Errors the executor can report for a single node.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The build graph rejected a status transition or lookup.
    #[error(transparent)]
    Graph(#[from] ember_graph::GraphError),

    /// The cache store failed to read or write an entry.
    #[error(transparent)]
    Cache(#[from] ember_cache::CacheError),

    /// The constructed sandbox spec failed validation.
    #[error(transparent)]
    Spec(#[from] ember_sandbox::BuildError),

    /// `id` has no registered [`Target`], or named a dependency with none.
    #[error("no target registered for node {0}")]
    UnknownTarget(NodeId),

    /// No driver is registered for a target's declared language.
    #[error("no driver registered for language {0:?}")]
    UnknownDriver(String),
}

/// Result type for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// What running one node produced: its terminal-or-Cached status, the
/// dependent ids this call promoted to `Ready` (straight from
/// [`BuildGraph::mark_status`]'s race-free return value), and any
/// descendants cancelled as a result of failure.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    /// The status the node reached.
    pub status: BuildStatus,
    /// Dependents this call promoted to `Ready` — submit these next.
    pub newly_ready: Vec<NodeId>,
    /// Descendants skipped as a consequence of this node failing.
    pub cancelled: Vec<NodeId>,
}

/// Runs a single node through the cache-then-build pipeline and reports the
/// resulting graph mutation. Stateless beyond its constructor arguments, so
/// one `Executor` is shared (via `Arc`) across every scheduler worker.
pub struct Executor {
    graph: Arc<BuildGraph>,
    targets: HashMap<NodeId, Target>,
    cache: Arc<CacheCoordinator>,
    drivers: Arc<DriverRegistry>,
    retry: RetryPolicy,
    subscribers: Vec<Arc<dyn BuildEventSubscriber>>,
    cancel_on_failure: bool,
    workspace_root: PathBuf,
    default_timeout_ms: u64,
    default_resource_limits: ResourceLimits,
}

impl Executor {
    /// Build an executor over `graph`, indexing `targets` by node id for the
    /// metadata (sources, language, flags, output hint) the graph itself
    /// does not retain.
    #[must_use]
    pub fn new(
        graph: Arc<BuildGraph>,
        targets: Vec<Target>,
        cache: Arc<CacheCoordinator>,
        drivers: Arc<DriverRegistry>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        let targets = targets.into_iter().map(|t| (NodeId::new(t.id.clone()), t)).collect();
        Self {
            graph,
            targets,
            cache,
            drivers,
            retry: RetryPolicy::default(),
            subscribers: Vec::new(),
            cancel_on_failure: true,
            workspace_root: workspace_root.into(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            default_resource_limits: ResourceLimits::default(),
        }
    }

    /// Override the default retry policy (default: [`RetryPolicy::default`]).
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register an event subscriber, notified synchronously in registration order.
    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Arc<dyn BuildEventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Whether a failed node's downstream subgraph is skipped (default `true`).
    #[must_use]
    pub fn with_cancel_on_failure(mut self, cancel: bool) -> Self {
        self.cancel_on_failure = cancel;
        self
    }

    /// Override the default resource limits applied to constructed sandbox specs.
    #[must_use]
    pub fn with_resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.default_resource_limits = limits;
        self
    }

    /// Override the default wall-clock timeout, in milliseconds.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Run `id` through the cache-then-build pipeline to completion,
    /// including any retries its [`RetryPolicy`] allows, and apply the
    /// resulting status transition to the graph.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::UnknownTarget`] if `id` has no registered
    /// target, [`ExecutorError::UnknownDriver`] if its language has no
    /// registered driver, or a propagated graph/cache/spec error.
    pub fn execute_node(&self, id: &NodeId) -> ExecutorResult<ExecutionSummary> {
        let target = self.targets.get(id).ok_or_else(|| ExecutorError::UnknownTarget(id.clone()))?;

        let _ = self.graph.mark_status(id, BuildStatus::Running)?;
        self.publish(BuildEvent::TargetStarted { node: id.clone() });
        let start = Instant::now();

        let source_digests = self.hash_paths(&target.sources);
        let dep_output_digests = self.dependency_output_digests(id)?;

        if let Some(entry) = self.cache.is_cached(&target.id, &source_digests, &dep_output_digests) {
            self.graph.set_cached_result(id, entry.output_digest)?;
            let newly_ready = self.graph.mark_status(id, BuildStatus::Cached)?;
            self.publish(BuildEvent::TargetCached { node: id.clone() });
            return Ok(ExecutionSummary { status: BuildStatus::Cached, newly_ready, cancelled: Vec::new() });
        }

        let driver = self.drivers.get(&target.language).ok_or_else(|| ExecutorError::UnknownDriver(target.language.clone()))?;
        let declared_inputs = driver.declare_inputs(&target.sources);
        let declared_outputs = driver.declare_outputs(target.output_hint.as_ref());
        let input_digests = self.hash_paths(&declared_inputs);
        let driver_metadata_digest = ContentHasher::hash_bytes(driver.version().as_bytes());
        let flags_digest = ContentHasher::hash_many(target.flags.iter().map(|f| f.as_bytes().to_vec()));

        if let Some(entry) = self.cache.is_action_cached(&target.id, &input_digests, &dep_output_digests, driver_metadata_digest, flags_digest) {
            self.graph.set_cached_result(id, entry.output_digest)?;
            let newly_ready = self.graph.mark_status(id, BuildStatus::Success)?;
            self.publish(BuildEvent::TargetCached { node: id.clone() });
            return Ok(ExecutionSummary { status: BuildStatus::Success, newly_ready, cancelled: Vec::new() });
        }

        let mut builder = SandboxBuilder::new()
            .skip_fs_checks()
            .network(NetworkPolicy::Hermetic)
            .resource_limits(self.default_resource_limits)
            .timeout_ms(self.default_timeout_ms);
        for input in &declared_inputs {
            builder = builder.input(self.workspace_root.join(input));
        }
        for output in &declared_outputs {
            builder = builder.output(output.clone());
        }
        // String-valued config entries pass straight through as env vars —
        // a driver that needs e.g. a compiler flag or a bound command reads
        // it back out of `spec.env()` rather than this crate growing a
        // driver-specific config channel.
        for (key, value) in &target.config {
            if let Some(s) = value.as_str() {
                builder = builder.env(key.clone(), s.to_string());
            }
        }
        let spec = builder.build()?;

        let mut attempt = 0u32;
        loop {
            match driver.invoke(&spec) {
                Ok(outcome) => {
                    let discoveries = self.resolve_discoveries(target, id, driver.as_ref());
                    if !discoveries.is_empty() {
                        self.graph.extend(discoveries)?;
                    }
                    self.record_success(target, id, &input_digests, &dep_output_digests, driver_metadata_digest, flags_digest, &source_digests, &outcome)?;
                    let newly_ready = self.graph.mark_status(id, BuildStatus::Success)?;
                    self.publish(BuildEvent::TargetCompleted { node: id.clone(), duration: start.elapsed() });
                    return Ok(ExecutionSummary { status: BuildStatus::Success, newly_ready, cancelled: Vec::new() });
                }
                Err(failure) => {
                    if failure.transient && self.retry.should_retry(ErrorKind::Driver, true, attempt) {
                        std::thread::sleep(self.retry.backoff_for(attempt));
                        attempt += 1;
                        continue;
                    }
                    let _ = self.graph.mark_status(id, BuildStatus::Failed)?;
                    self.publish(BuildEvent::TargetFailed { node: id.clone(), error: failure.to_string() });
                    let cancelled = if self.cancel_on_failure { self.graph.cancel_descendants(id)? } else { Vec::new() };
                    for skipped in &cancelled {
                        self.publish(BuildEvent::TargetSkipped { node: skipped.clone() });
                    }
                    return Ok(ExecutionSummary { status: BuildStatus::Failed, newly_ready: Vec::new(), cancelled });
                }
            }
        }
    }

    /// §4.6 step 4: fold a driver's `analyze_imports` report back into the
    /// graph as new consumer edges, the way a compiler's discovered-includes
    /// report gates whichever other target turns out to depend on what was
    /// just built. Each `Import::raw` that names another node already in the
    /// graph becomes `Discovery::NewEdge { dependency: id, dependent: raw }`
    /// — `id` (the node that just finished running) is always the edge's
    /// `dependency` side, never its `dependent`, so this can never race
    /// `BuildGraph::extend`'s `TooLate` check against the node currently
    /// executing.
    fn resolve_discoveries(&self, target: &Target, id: &NodeId, driver: &dyn LanguageDriver) -> Vec<Discovery> {
        driver
            .analyze_imports(&target.sources)
            .into_iter()
            .filter_map(|import| {
                let consumer = NodeId::new(import.raw);
                (consumer != *id && self.graph.node(&consumer).is_some())
                    .then_some(Discovery::NewEdge { dependency: id.clone(), dependent: consumer })
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn record_success(
        &self,
        target: &Target,
        id: &NodeId,
        input_digests: &[Digest],
        dep_output_digests: &[Digest],
        driver_metadata_digest: Digest,
        flags_digest: Digest,
        source_digests: &[Digest],
        outcome: &InvokeOutcome,
    ) -> ExecutorResult<()> {
        // A driver's declared outputs are relative to the sandbox root, but
        // this reference executor treats the workspace itself as that root
        // (no concrete driver shipped here actually isolates into a scratch
        // directory) — see DESIGN.md on why output materialization and
        // sandbox teardown are left to the driver implementation.
        let resolved: Vec<PathBuf> = outcome.output_paths.iter().map(|p| self.workspace_root.join(p)).collect();
        let output_digests = ContentHasher::hash_files_parallel(&resolved, num_cpus::get()).unwrap_or_default();
        let output_digest = ContentHasher::hash_many(output_digests.iter().map(|d| d.as_bytes().to_vec()));
        let size_bytes = resolved.iter().filter_map(|p| std::fs::metadata(p).ok()).map(|m| m.len()).sum();
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);

        let entry = CacheEntry::success(output_digest, timestamp, size_bytes, outcome.output_paths.clone());
        self.cache.record_action(
            &target.id,
            input_digests,
            dep_output_digests,
            driver_metadata_digest,
            flags_digest,
            entry.clone(),
            Artifact::Paths(outcome.output_paths.clone()),
        )?;
        self.cache.update(&target.id, source_digests, dep_output_digests, entry, Artifact::Paths(outcome.output_paths.clone()))?;
        self.graph.set_cached_result(id, output_digest)?;
        Ok(())
    }

    fn hash_paths(&self, paths: &[PathBuf]) -> Vec<Digest> {
        paths
            .iter()
            .map(|p| ContentHasher::hash_file(&self.workspace_root.join(p)).unwrap_or_else(|_| Digest::zero()))
            .collect()
    }

    fn dependency_output_digests(&self, id: &NodeId) -> ExecutorResult<Vec<Digest>> {
        let node = self.graph.node(id).ok_or_else(|| ExecutorError::UnknownTarget(id.clone()))?;
        let mut deps: Vec<NodeId> = node.dependencies().iter().cloned().collect();
        deps.sort();
        Ok(deps.iter().map(|d| self.graph.node(d).and_then(|n| n.cached_result()).unwrap_or_else(Digest::zero)).collect())
    }

    fn publish(&self, event: BuildEvent) {
        for subscriber in &self.subscribers {
            subscriber.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverFailure, Import};
    use ember_graph::TargetKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct WritingDriver {
        workspace_root: PathBuf,
        invocations: AtomicUsize,
    }

    impl WritingDriver {
        fn new(workspace_root: PathBuf) -> Self {
            Self { workspace_root, invocations: AtomicUsize::new(0) }
        }
    }

    impl crate::driver::LanguageDriver for WritingDriver {
        fn analyze_imports(&self, _sources: &[PathBuf]) -> Vec<Import> {
            Vec::new()
        }
        fn declare_inputs(&self, sources: &[PathBuf]) -> Vec<PathBuf> {
            sources.to_vec()
        }
        fn declare_outputs(&self, output_hint: Option<&PathBuf>) -> Vec<PathBuf> {
            output_hint.cloned().into_iter().collect()
        }
        fn invoke(&self, spec: &ember_sandbox::HermeticSpec) -> Result<InvokeOutcome, DriverFailure> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            for output in spec.outputs() {
                let full = self.workspace_root.join(output);
                if let Some(parent) = full.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                std::fs::write(&full, b"built").map_err(|e| DriverFailure { message: e.to_string(), exit_code: None, transient: false })?;
            }
            Ok(InvokeOutcome { output_paths: spec.outputs().to_vec(), warnings: Vec::new(), diagnostics: Vec::new() })
        }
        fn version(&self) -> String {
            "writing-1".to_string()
        }
    }

    struct FailingDriver;
    impl crate::driver::LanguageDriver for FailingDriver {
        fn analyze_imports(&self, _sources: &[PathBuf]) -> Vec<Import> {
            Vec::new()
        }
        fn declare_inputs(&self, sources: &[PathBuf]) -> Vec<PathBuf> {
            sources.to_vec()
        }
        fn declare_outputs(&self, _output_hint: Option<&PathBuf>) -> Vec<PathBuf> {
            Vec::new()
        }
        fn invoke(&self, _spec: &ember_sandbox::HermeticSpec) -> Result<InvokeOutcome, DriverFailure> {
            Err(DriverFailure { message: "compile error".to_string(), exit_code: Some(1), transient: false })
        }
        fn version(&self) -> String {
            "failing-1".to_string()
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<WritingDriver>, Executor, NodeId) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), b"fn main() {}").unwrap();

        let target = Target::new("//a:x", TargetKind::Executable, "rust", vec![PathBuf::from("main.rs")]);
        let target = Target { output_hint: Some(PathBuf::from("out/a.bin")), ..target };
        let id = NodeId::new("//a:x");

        let graph = Arc::new(BuildGraph::new(vec![target.clone()]).unwrap());
        let cache = Arc::new(CacheCoordinator::open(dir.path().join("cache"), 0).unwrap());
        let driver = Arc::new(WritingDriver::new(dir.path().to_path_buf()));
        let mut registry = DriverRegistry::new();
        registry.register("rust", Arc::clone(&driver) as Arc<dyn crate::driver::LanguageDriver>);
        let executor = Executor::new(graph, vec![target], cache, Arc::new(registry), dir.path());
        (dir, driver, executor, id)
    }

    #[test]
    fn cold_build_invokes_driver_and_marks_success() {
        let (_dir, _driver, executor, id) = setup();
        let summary = executor.execute_node(&id).unwrap();
        assert_eq!(summary.status, BuildStatus::Success);
        assert!(summary.cancelled.is_empty());
    }

    #[test]
    fn second_identical_build_is_a_target_cache_hit() {
        let (dir, driver, executor, id) = setup();
        let first = executor.execute_node(&id).unwrap();
        assert_eq!(first.status, BuildStatus::Success);
        assert_eq!(driver.invocations.load(Ordering::SeqCst), 1);

        // A fresh graph and executor sharing the same on-disk cache root
        // simulates a second, separate build invocation.
        let target = Target::new("//a:x", TargetKind::Executable, "rust", vec![PathBuf::from("main.rs")]);
        let target = Target { output_hint: Some(PathBuf::from("out/a.bin")), ..target };
        let graph = Arc::new(BuildGraph::new(vec![target.clone()]).unwrap());
        let cache = Arc::new(CacheCoordinator::open(dir.path().join("cache"), 0).unwrap());
        let mut registry = DriverRegistry::new();
        registry.register("rust", Arc::clone(&driver) as Arc<dyn crate::driver::LanguageDriver>);
        let second_executor = Executor::new(graph, vec![target], cache, Arc::new(registry), dir.path());

        let second = second_executor.execute_node(&id).unwrap();
        assert_eq!(second.status, BuildStatus::Cached);
        assert_eq!(driver.invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_driver_language_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::new("//a:x", TargetKind::Executable, "cobol", vec![PathBuf::from("main.cob")]);
        let id = NodeId::new("//a:x");
        let graph = Arc::new(BuildGraph::new(vec![target.clone()]).unwrap());
        let cache = Arc::new(CacheCoordinator::open(dir.path().join("cache"), 0).unwrap());
        let executor = Executor::new(graph, vec![target], cache, Arc::new(DriverRegistry::new()), dir.path());
        let err = executor.execute_node(&id).unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownDriver(lang) if lang == "cobol"));
    }

    #[test]
    fn failing_driver_marks_failed_and_cancels_descendants() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), b"fn main() {}").unwrap();
        let a = Target::new("//a", TargetKind::Library, "rust", vec![PathBuf::from("main.rs")]);
        let b = Target::new("//b", TargetKind::Executable, "rust", vec![PathBuf::from("main.rs")]).depends_on("//a");
        let graph = Arc::new(BuildGraph::new(vec![a.clone(), b.clone()]).unwrap());
        let cache = Arc::new(CacheCoordinator::open(dir.path().join("cache"), 0).unwrap());
        let mut registry = DriverRegistry::new();
        registry.register("rust", Arc::new(FailingDriver) as Arc<dyn crate::driver::LanguageDriver>);
        let executor = Executor::new(graph, vec![a, b], cache, Arc::new(registry), dir.path());

        let summary = executor.execute_node(&NodeId::new("//a")).unwrap();
        assert_eq!(summary.status, BuildStatus::Failed);
        assert_eq!(summary.cancelled, vec![NodeId::new("//b")]);
    }

    #[test]
    fn events_are_published_in_order() {
        let (_dir, _driver, executor, id) = setup();
        let events = Arc::new(Mutex::new(Vec::new()));
        let events2 = Arc::clone(&events);
        let executor = executor.with_subscriber(crate::events::FnSubscriber::new(move |event: &BuildEvent| {
            events2.lock().unwrap().push(format!("{event:?}"));
        }));
        let _ = executor.execute_node(&id).unwrap();
        let recorded = events.lock().unwrap();
        assert!(recorded[0].starts_with("TargetStarted"));
        assert!(recorded.last().unwrap().starts_with("TargetCompleted"));
    }
}
