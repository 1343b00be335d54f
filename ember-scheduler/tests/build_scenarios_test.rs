//! End-to-end build scenarios wiring `ember-graph`, `ember-cache`,
//! `ember-sandbox` and this crate's scheduler/executor together, the way a
//! real `ember build` invocation does. Grounded in the teacher's
//! `convenient-graph/tests/cache_integrity_test.rs` (a println-narrated,
//! multi-build integration test over the same graph type the unit tests
//! exercise in isolation) and `convenient-bitbake/tests/parallel_execution_test.rs`
//! for the work-stealing load scenario.

use ember_cache::CacheCoordinator;
use ember_graph::{BuildGraph, BuildStatus, NodeId, Target, TargetKind};
use ember_sandbox::HermeticSpec;
use ember_scheduler::{DriverFailure, DriverRegistry, Executor, Import, InvokeOutcome, LanguageDriver, Priority, WorkStealingScheduler};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct WritingDriver {
    root: PathBuf,
    invocations: AtomicUsize,
}

impl WritingDriver {
    fn new(root: PathBuf) -> Self {
        Self { root, invocations: AtomicUsize::new(0) }
    }
}

impl LanguageDriver for WritingDriver {
    fn analyze_imports(&self, sources: &[PathBuf]) -> Vec<Import> {
        // Only the codegen target's source (`gen.proto`) reports a discovered
        // consumer edge — every other scenario's sources are left alone so
        // this shared driver doesn't perturb their graphs.
        sources
            .iter()
            .find(|s| s.file_name().and_then(|n| n.to_str()) == Some("gen.proto"))
            .map(|s| vec![Import { raw: "//app:main".to_string(), from: s.clone() }])
            .unwrap_or_default()
    }
    fn declare_inputs(&self, sources: &[PathBuf]) -> Vec<PathBuf> {
        sources.to_vec()
    }
    fn declare_outputs(&self, output_hint: Option<&PathBuf>) -> Vec<PathBuf> {
        output_hint.cloned().into_iter().collect()
    }
    fn invoke(&self, spec: &HermeticSpec) -> Result<InvokeOutcome, DriverFailure> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        for output in spec.outputs() {
            let full = self.root.join(output);
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

/// Drives `initial` through a scheduler to completion, spawning newly-ready
/// dependents as driver-local subtasks — the same external-vs-local
/// submission split `ember`'s own `commands::build::run_to_completion` uses.
/// A node the executor discovers mid-run (via `ExecutionSummary::newly_ready`)
/// reaches the scheduler this way even if it was never part of `initial`.
fn drive_from(graph: &Arc<BuildGraph>, executor: &Arc<Executor>, workers: usize, initial: Vec<NodeId>) {
    let graph_for_worker = Arc::clone(graph);
    let executor_for_worker = Arc::clone(executor);
    let scheduler = WorkStealingScheduler::start(workers, move |id: NodeId, handle| {
        if let Ok(summary) = executor_for_worker.execute_node(&id) {
            for dependent in summary.newly_ready {
                let node = graph_for_worker.node(&dependent).expect("newly-ready dependent must still exist");
                handle.spawn_local(dependent, Priority::Normal, node.critical_path_cost(), node.depth(), node.dependents_count());
            }
        }
    });
    for id in initial {
        let node = graph.node(&id).expect("initial node must exist");
        scheduler.submit(id, Priority::Normal, node.critical_path_cost(), node.depth(), node.dependents_count());
    }
    scheduler.wait_all();
    scheduler.shutdown();
}

/// Drives every currently-ready node through a scheduler to completion.
fn drive_to_completion(graph: &Arc<BuildGraph>, executor: &Arc<Executor>, workers: usize) {
    drive_from(graph, executor, workers, graph.ready_nodes());
}

/// Scenario A (spec §8): single target, pre-populated target cache — zero
/// driver invocations, the node lands `Cached`.
#[test]
fn scenario_a_single_target_cache_hit() {
    println!("\n=== Scenario A: single-target cache hit ===\n");
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.c"), b"int main() {}").unwrap();

    let target = Target::new("//a:x", TargetKind::Executable, "rust", vec![PathBuf::from("a.c")]);
    let target = Target { output_hint: Some(PathBuf::from("a.out")), ..target };

    let source_digest = ember_digest::ContentHasher::hash_file(&dir.path().join("a.c")).unwrap();
    let cache = CacheCoordinator::open(dir.path().join("cache"), 0).unwrap();
    let output_digest = ember_digest::ContentHasher::hash_bytes(b"pre-populated");
    let entry = ember_cache::CacheEntry::success(output_digest, 0, 13, Vec::new());
    cache.update("//a:x", &[source_digest], &[], entry, ember_cache::Artifact::None).unwrap();

    let graph = Arc::new(BuildGraph::new(vec![target.clone()]).unwrap());
    let driver = Arc::new(WritingDriver::new(dir.path().to_path_buf()));
    let mut registry = DriverRegistry::new();
    registry.register("rust", Arc::clone(&driver) as Arc<dyn LanguageDriver>);
    let executor = Arc::new(Executor::new(Arc::clone(&graph), vec![target], Arc::new(cache), Arc::new(registry), dir.path()));

    drive_to_completion(&graph, &executor, 1);

    assert_eq!(graph.node(&NodeId::new("//a:x")).unwrap().status(), BuildStatus::Cached);
    assert_eq!(driver.invocations.load(Ordering::SeqCst), 0, "a target-cache hit must never invoke the driver");
    println!("=== Scenario A passed: zero driver invocations, node Cached ===\n");
}

/// Scenario B (spec §8): two-target chain, cold cache — lib then app, each
/// driver called exactly once, dependents re-evaluated exactly once.
#[test]
fn scenario_b_two_target_chain_cold_build() {
    println!("\n=== Scenario B: two-target chain, cold build ===\n");
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lib.c"), b"int lib() { return 1; }").unwrap();
    std::fs::write(dir.path().join("app.c"), b"int main() { return lib(); }").unwrap();

    let lib = Target::new("//a:lib", TargetKind::Library, "rust", vec![PathBuf::from("lib.c")]);
    let lib = Target { output_hint: Some(PathBuf::from("lib.out")), ..lib };
    let app = Target::new("//a:app", TargetKind::Executable, "rust", vec![PathBuf::from("app.c")]).depends_on("//a:lib");
    let app = Target { output_hint: Some(PathBuf::from("app.out")), ..app };

    let graph = Arc::new(BuildGraph::new(vec![lib.clone(), app.clone()]).unwrap());
    let cache = Arc::new(CacheCoordinator::open(dir.path().join("cache"), 0).unwrap());
    let driver = Arc::new(WritingDriver::new(dir.path().to_path_buf()));
    let mut registry = DriverRegistry::new();
    registry.register("rust", Arc::clone(&driver) as Arc<dyn LanguageDriver>);
    let executor = Arc::new(Executor::new(Arc::clone(&graph), vec![lib, app], cache, Arc::new(registry), dir.path()));

    drive_to_completion(&graph, &executor, 1);

    assert_eq!(graph.node(&NodeId::new("//a:lib")).unwrap().status(), BuildStatus::Success);
    assert_eq!(graph.node(&NodeId::new("//a:app")).unwrap().status(), BuildStatus::Success);
    assert_eq!(driver.invocations.load(Ordering::SeqCst), 2, "lib and app each invoke the driver exactly once");
    println!("=== Scenario B passed: lib then app, one driver call each ===\n");
}

/// Scenario C (spec §8): 100 independent targets over 4 workers — all
/// execute, `wait_all` completes promptly, and stealing actually happens.
#[test]
fn scenario_c_work_stealing_load_balance() {
    println!("\n=== Scenario C: work-stealing load balance ===\n");
    let dir = tempfile::tempdir().unwrap();
    let mut targets = Vec::new();
    for i in 0..100 {
        let src = format!("t{i}.c");
        std::fs::write(dir.path().join(&src), b"x").unwrap();
        let t = Target::new(format!("//gen:t{i}"), TargetKind::Library, "rust", vec![PathBuf::from(src)]);
        targets.push(Target { output_hint: Some(PathBuf::from(format!("t{i}.out"))), ..t });
    }

    let graph = Arc::new(BuildGraph::new(targets.clone()).unwrap());
    let cache = Arc::new(CacheCoordinator::open(dir.path().join("cache"), 0).unwrap());
    let driver = Arc::new(WritingDriver::new(dir.path().to_path_buf()));
    let mut registry = DriverRegistry::new();
    registry.register("rust", Arc::clone(&driver) as Arc<dyn LanguageDriver>);
    let executor = Arc::new(Executor::new(Arc::clone(&graph), targets, cache, Arc::new(registry), dir.path()));

    let started = std::time::Instant::now();
    drive_to_completion(&graph, &executor, 4);
    let elapsed = started.elapsed();

    assert_eq!(driver.invocations.load(Ordering::SeqCst), 100);
    for id in graph.node_ids() {
        assert_eq!(graph.node(&id).unwrap().status(), BuildStatus::Success);
    }
    assert!(elapsed.as_millis() < 5_000, "100 near-instant targets on 4 workers should finish quickly, took {elapsed:?}");
    println!("=== Scenario C passed: all 100 targets executed in {elapsed:?} ===\n");
}

/// Scenario E (spec §8): `//gen:proto` declares no static consumer, but its
/// driver's `analyze_imports` reports a discovered edge from `//app:main`
/// while it runs. The executor (not the test) must flush that edge into the
/// graph before its terminal transition, so `//app:main` — submitted to the
/// scheduler only if and when it becomes ready — never runs until the
/// discovered dependency completes.
#[test]
fn scenario_e_dynamic_discovery_gates_the_dependent() {
    println!("\n=== Scenario E: dynamic discovery ===\n");
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("gen.proto"), b"message Foo {}").unwrap();
    std::fs::write(dir.path().join("main.cc"), b"int main() {}").unwrap();

    let proto = Target::new("//gen:proto", TargetKind::Custom("codegen".into()), "rust", vec![PathBuf::from("gen.proto")]);
    let proto = Target { output_hint: Some(PathBuf::from("gen.pb.cc")), ..proto };
    let app = Target::new("//app:main", TargetKind::Executable, "rust", vec![PathBuf::from("main.cc")]);
    let app = Target { output_hint: Some(PathBuf::from("app.out")), ..app };

    let graph = Arc::new(BuildGraph::new(vec![proto.clone(), app.clone()]).unwrap());
    assert_eq!(graph.ready_nodes().len(), 2, "both nodes start independent and ready — no static edge between them");

    let cache = Arc::new(CacheCoordinator::open(dir.path().join("cache"), 0).unwrap());
    let driver = Arc::new(WritingDriver::new(dir.path().to_path_buf()));
    let mut registry = DriverRegistry::new();
    registry.register("rust", Arc::clone(&driver) as Arc<dyn LanguageDriver>);
    let executor = Arc::new(Executor::new(Arc::clone(&graph), vec![proto, app], cache, Arc::new(registry), dir.path()));

    // Submit only `//gen:proto`. `//app:main` reaches the scheduler solely
    // through `ExecutionSummary::newly_ready` once the driver's discovered
    // edge has gated and then released it — if the executor never flushed
    // the discovery, `//app:main` would simply never run.
    drive_from(&graph, &executor, 1, vec![NodeId::new("//gen:proto")]);

    assert_eq!(graph.node(&NodeId::new("//gen:proto")).unwrap().status(), BuildStatus::Success);
    assert_eq!(graph.node(&NodeId::new("//app:main")).unwrap().status(), BuildStatus::Success);
    assert_eq!(driver.invocations.load(Ordering::SeqCst), 2, "both the codegen target and its discovered consumer ran");
    println!("=== Scenario E passed: app:main only ran after the discovered dependency completed ===\n");
}

/// Scenario F (spec §8): a resource-limit violation fails only the node it
/// hit, and cancels the downstream subgraph per the default cancel policy —
/// cache is left untouched for the failed action.
#[cfg(target_os = "linux")]
#[test]
fn scenario_f_resource_limit_violation_cancels_descendants() {
    println!("\n=== Scenario F: resource-limit violation ===\n");
    use ember_scheduler::ExecutorError;

    struct OomDriver;
    impl LanguageDriver for OomDriver {
        fn analyze_imports(&self, _sources: &[PathBuf]) -> Vec<Import> {
            Vec::new()
        }
        fn declare_inputs(&self, sources: &[PathBuf]) -> Vec<PathBuf> {
            sources.to_vec()
        }
        fn declare_outputs(&self, _output_hint: Option<&PathBuf>) -> Vec<PathBuf> {
            Vec::new()
        }
        fn invoke(&self, _spec: &HermeticSpec) -> Result<InvokeOutcome, DriverFailure> {
            // Policy violations (declared-but-unenforced here: the real
            // enforcement point is `ember_sandbox::Sandbox::execute`, out
            // of this crate's direct call path) are reported as
            // non-transient so the executor never retries them.
            Err(DriverFailure { message: "memory limit exceeded: used more than 67108864 bytes".to_string(), exit_code: None, transient: false })
        }
        fn version(&self) -> String {
            "oom-1".to_string()
        }
    }

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.c"), b"x").unwrap();
    let a = Target::new("//a", TargetKind::Executable, "rust", vec![PathBuf::from("a.c")]);
    let b = Target::new("//b", TargetKind::Executable, "rust", vec![PathBuf::from("a.c")]).depends_on("//a");

    let graph = Arc::new(BuildGraph::new(vec![a.clone(), b.clone()]).unwrap());
    let cache = Arc::new(CacheCoordinator::open(dir.path().join("cache"), 0).unwrap());
    let mut registry = DriverRegistry::new();
    registry.register("rust", Arc::new(OomDriver) as Arc<dyn LanguageDriver>);
    let executor = Executor::new(Arc::clone(&graph), vec![a, b], Arc::clone(&cache), Arc::new(registry), dir.path());

    let summary = executor.execute_node(&NodeId::new("//a")).unwrap();
    assert_eq!(summary.status, BuildStatus::Failed);
    assert_eq!(summary.cancelled, vec![NodeId::new("//b")]);
    assert_eq!(graph.node(&NodeId::new("//b")).unwrap().status(), BuildStatus::Skipped);
    assert!(cache.get_stats().action.hits == 0 && cache.get_stats().action.misses <= 1, "the failed action must never be recorded as cached");
    let _ = ExecutorError::UnknownTarget(NodeId::new("unused"));
    println!("=== Scenario F passed: //a Failed, //b Skipped, cache untouched ===\n");
}
