//! `ember build`: load a workspace, construct the graph, run the
//! work-stealing scheduler to completion, and print a summary — grounded in
//! `bitzel::executor::BuildStats::display` (`examples/avrabe-graph-git-rs/
//! bitzel/src/executor.rs`), adapted from a single `async execute_build`
//! call to this crate's submit-then-`wait_all` scheduler API.

use crate::drivers::{NullDriver, ShellDriver};
use crate::error::{EmberError, EmberResult};
use crate::manifest::{self, Workspace};
use ember_cache::CacheCoordinator;
use ember_graph::{BuildGraph, BuildStatus, NodeId, Target};
use ember_scheduler::{
    BuildEvent, DriverRegistry, Executor, FnSubscriber as SchedulerSubscriber, Priority, WorkStealingScheduler,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Options governing one `ember build` invocation, already resolved from CLI
/// flags layered over the manifest's `[workspace]` table.
pub struct BuildOptions {
    /// Path to the workspace manifest.
    pub manifest_path: PathBuf,
    /// Worker thread count override.
    pub workers: Option<usize>,
    /// Cache root override.
    pub cache_dir: Option<PathBuf>,
    /// Remote cache base URL override.
    pub remote_cache: Option<String>,
    /// Restrict the build to these target ids; empty means "everything".
    pub targets: Vec<String>,
}

/// A completed build's headline numbers, printed by [`BuildSummary::display`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildSummary {
    /// Nodes that ran a driver to completion.
    pub executed: u64,
    /// Nodes satisfied by a cache hit at either granularity.
    pub cached: u64,
    /// Nodes that failed.
    pub failed: u64,
    /// Nodes skipped as a consequence of an upstream failure.
    pub skipped: u64,
    /// Total nodes in the graph.
    pub total: usize,
    /// Combined target+action cache hit rate.
    pub hit_rate: f64,
    /// Wall-clock duration of the whole invocation.
    pub duration: Duration,
}

impl BuildSummary {
    /// Print the summary the way `bitzel::executor::BuildStats::display` does.
    pub fn display(&self) {
        println!("\n📊 Build Summary:");
        println!("  Tasks executed: {}", self.executed);
        println!("  Cache hits:     {}", self.cached);
        println!("  Failed:         {}", self.failed);
        println!("  Skipped:        {}", self.skipped);
        println!("  Total targets:  {}", self.total);
        println!("  Cache hit rate: {:.1}%", self.hit_rate * 100.0);
        println!("  Duration:       {:.2}s", self.duration.as_secs_f64());
    }
}

/// Run a full build per `options`, returning the final summary.
///
/// # Errors
///
/// Returns [`EmberError`] if the manifest cannot be loaded, the graph cannot
/// be constructed (a cycle or unknown dependency), or the cache cannot be
/// opened.
pub fn run(options: &BuildOptions) -> EmberResult<BuildSummary> {
    let started = Instant::now();
    let workspace = manifest::load(&options.manifest_path).map_err(|source| EmberError::Manifest {
        path: options.manifest_path.display().to_string(),
        source: source.into(),
    })?;
    let Workspace { root, settings, mut targets } = workspace;

    if !options.targets.is_empty() {
        targets = select_closure(targets, &options.targets);
    }

    let registry = build_registry(&mut targets, &root);

    let graph = Arc::new(BuildGraph::new(targets.clone())?);
    let workers = options.workers.or(settings.workers).unwrap_or_else(num_cpus::get);
    let cache_dir = options.cache_dir.clone().unwrap_or(settings.cache_dir.clone());
    let cache_dir = if cache_dir.is_absolute() { cache_dir } else { root.join(cache_dir) };
    let mut coordinator = CacheCoordinator::open(&cache_dir, settings.cache_byte_budget)?;
    if let Some(url) = options.remote_cache.as_ref().or(settings.remote_cache.as_ref()) {
        let client = ember_cache::BazelRemoteClient::new(url)?;
        coordinator = coordinator.with_remote(Arc::new(client));
    }
    let cache = Arc::new(coordinator);

    let counters = Arc::new(ProgressCounters::default());
    let subscriber = progress_subscriber(Arc::clone(&counters));

    let executor = Arc::new(
        Executor::new(Arc::clone(&graph), targets, Arc::clone(&cache), Arc::new(registry), root)
            .with_cancel_on_failure(settings.cancel_on_failure)
            .with_timeout_ms(settings.timeout_ms)
            .with_subscriber(subscriber),
    );

    run_to_completion(&graph, &executor, workers);

    cache.flush()?;
    cache.close()?;

    let stats = cache.get_stats();
    let combined_hits = stats.target.hits + stats.action.hits;
    let combined_total = combined_hits + stats.target.misses + stats.action.misses;
    let hit_rate = if combined_total == 0 { 0.0 } else { combined_hits as f64 / combined_total as f64 };

    Ok(BuildSummary {
        executed: counters.executed.load(Ordering::SeqCst),
        cached: counters.cached.load(Ordering::SeqCst),
        failed: counters.failed.load(Ordering::SeqCst),
        skipped: counters.skipped.load(Ordering::SeqCst),
        total: graph.len(),
        hit_rate,
        duration: started.elapsed(),
    })
}

/// Drive `graph` to completion with `executor`, on an `N`-worker
/// [`WorkStealingScheduler`]: submit the initial ready frontier to the
/// global queue (external submission), and spawn each newly-ready dependent
/// onto the completing worker's own deque (a completion-triggered subtask,
/// per §4.6/§9's local-vs-global submission split).
fn run_to_completion(graph: &Arc<BuildGraph>, executor: &Arc<Executor>, workers: usize) {
    let executor_for_worker = Arc::clone(executor);
    let graph_for_worker = Arc::clone(graph);
    let scheduler = WorkStealingScheduler::start(workers, move |node_id: NodeId, handle| {
        match executor_for_worker.execute_node(&node_id) {
            Ok(summary) => {
                for newly_ready in summary.newly_ready {
                    submit_metrics(&graph_for_worker, &newly_ready, |id, priority, cost, depth, dependents| {
                        handle.spawn_local(id, priority, cost, depth, dependents);
                    });
                }
            }
            Err(error) => {
                tracing::error!(%node_id, %error, "node execution failed");
            }
        }
    });

    for id in graph.ready_nodes() {
        submit_metrics(graph, &id, |id, priority, cost, depth, dependents| {
            scheduler.submit(id, priority, cost, depth, dependents);
        });
    }

    scheduler.wait_all();
    scheduler.shutdown();
}

fn submit_metrics(graph: &BuildGraph, id: &NodeId, mut submit: impl FnMut(NodeId, Priority, u64, u32, u32)) {
    let Some(node) = graph.node(id) else { return };
    submit(id.clone(), Priority::Normal, node.critical_path_cost(), node.depth(), node.dependents_count());
}

#[derive(Default)]
struct ProgressCounters {
    executed: std::sync::atomic::AtomicU64,
    cached: std::sync::atomic::AtomicU64,
    failed: std::sync::atomic::AtomicU64,
    skipped: std::sync::atomic::AtomicU64,
}

fn progress_subscriber(counters: Arc<ProgressCounters>) -> Arc<dyn ember_scheduler::BuildEventSubscriber> {
    let printed = Arc::new(Mutex::new(()));
    SchedulerSubscriber::new(move |event: &BuildEvent| {
        let _guard = printed.lock().unwrap();
        match event {
            BuildEvent::TargetStarted { node } => println!("  ▶ {node}"),
            BuildEvent::TargetCompleted { node, duration } => {
                counters.executed.fetch_add(1, Ordering::SeqCst);
                println!("  ✓ {node} ({:.0}ms)", duration.as_secs_f64() * 1000.0);
            }
            BuildEvent::TargetCached { node } => {
                counters.cached.fetch_add(1, Ordering::SeqCst);
                println!("  ⚡ {node} (cached)");
            }
            BuildEvent::TargetFailed { node, error } => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                println!("  ✗ {node}: {error}");
            }
            BuildEvent::TargetSkipped { node } => {
                counters.skipped.fetch_add(1, Ordering::SeqCst);
                println!("  ⊘ {node} (skipped)");
            }
            BuildEvent::TargetProgress { node, message } => println!("  … {node}: {message}"),
        }
    })
}

/// Restrict `targets` to the transitive dependency closure of `roots`,
/// preserving declaration order.
fn select_closure(targets: Vec<Target>, roots: &[String]) -> Vec<Target> {
    let by_id: std::collections::HashMap<String, Target> = targets.into_iter().map(|t| (t.id.clone(), t)).collect();
    let mut wanted: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut queue: std::collections::VecDeque<String> = roots.iter().cloned().collect();
    while let Some(id) = queue.pop_front() {
        if wanted.insert(id.clone()) {
            if let Some(target) = by_id.get(&id) {
                queue.extend(target.dependencies.iter().cloned());
            }
        }
    }
    by_id.into_iter().filter(|(id, _)| wanted.contains(id)).map(|(_, t)| t).collect()
}

/// Register one driver per distinct language tag seen in `targets`: a
/// [`ShellDriver`] per target whose `language` is `"shell"` (under a
/// per-target synthetic tag, since `LanguageDriver::invoke` carries no
/// target-identifying parameter for it to key off), and a [`NullDriver`] for
/// every other tag — this binary ships no real compiler invocation (an
/// explicit Non-goal), so unrecognized languages dry-run rather than fail
/// outright.
fn build_registry(targets: &mut [Target], workspace_root: &Path) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    let shell_driver: Arc<dyn ember_scheduler::LanguageDriver> = Arc::new(ShellDriver::new(workspace_root));
    let null_driver: Arc<dyn ember_scheduler::LanguageDriver> = Arc::new(NullDriver);
    let shell_tag_seq = AtomicUsize::new(0);

    for target in targets.iter_mut() {
        if target.language == "shell" {
            let tag = format!("shell#{}", shell_tag_seq.fetch_add(1, Ordering::Relaxed));
            registry.register(tag.clone(), Arc::clone(&shell_driver));
            target.language = tag;
        } else if registry.get(&target.language).is_none() {
            registry.register(target.language.clone(), Arc::clone(&null_driver));
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path) -> PathBuf {
        let manifest_path = dir.join("ember.toml");
        std::fs::write(
            &manifest_path,
            r#"
            [workspace]
            workers = 2

            [[target]]
            id = "//a:lib"
            kind = "library"
            language = "shell"
            sources = []

            [target.config]
            cmd = "echo building lib > lib.out"

            [[target]]
            id = "//a:app"
            kind = "executable"
            language = "shell"
            sources = []
            dependencies = ["//a:lib"]

            [target.config]
            cmd = "echo building app > app.out"
            "#,
        )
        .unwrap();
        manifest_path
    }

    #[test]
    fn cold_build_of_a_two_target_chain_runs_both_drivers() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = write_manifest(dir.path());

        // config key "cmd" is not special to the manifest loader — rewrite
        // it as the EMBER_SHELL_CMD the ShellDriver actually reads.
        let mut workspace = manifest::load(&manifest_path).unwrap();
        for target in &mut workspace.targets {
            if let Some(cmd) = target.config.get("cmd").and_then(|v| v.as_str().map(str::to_string)) {
                target.config.insert("EMBER_SHELL_CMD".to_string(), ember_graph::ConfigValue::String(cmd));
            }
        }
        let rewritten_path = dir.path().join("rewritten.toml");
        // Re-run through the real path: write back is unnecessary since
        // `run` re-loads from disk, so patch the manifest file directly.
        std::fs::write(
            &rewritten_path,
            format!(
                r#"
                [workspace]
                workers = 2

                [[target]]
                id = "//a:lib"
                kind = "library"
                language = "shell"
                sources = []

                [target.config]
                EMBER_SHELL_CMD = "echo lib > lib.out"

                [[target]]
                id = "//a:app"
                kind = "executable"
                language = "shell"
                sources = []
                dependencies = ["//a:lib"]

                [target.config]
                EMBER_SHELL_CMD = "echo app > app.out"
                "#
            ),
        )
        .unwrap();

        let options = BuildOptions {
            manifest_path: rewritten_path,
            workers: None,
            cache_dir: None,
            remote_cache: None,
            targets: Vec::new(),
        };
        let summary = run(&options).unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.total, 2);
        assert!(dir.path().join("lib.out").exists());
        assert!(dir.path().join("app.out").exists());
    }

    #[test]
    fn select_closure_keeps_only_requested_subgraph() {
        let a = Target::new("//a", ember_graph::TargetKind::Library, "rust", vec![]);
        let b = Target::new("//b", ember_graph::TargetKind::Library, "rust", vec![]).depends_on("//a");
        let c = Target::new("//c", ember_graph::TargetKind::Library, "rust", vec![]);
        let selected = select_closure(vec![a, b, c], &["//b".to_string()]);
        let mut ids: Vec<String> = selected.into_iter().map(|t| t.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["//a".to_string(), "//b".to_string()]);
    }

    #[test]
    fn unreachable_status_after_clean_run_is_all_success() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("ember.toml");
        std::fs::write(
            &manifest_path,
            r#"
            [[target]]
            id = "//a:x"
            kind = "library"
            language = "rust"
            sources = []
            "#,
        )
        .unwrap();
        let options = BuildOptions {
            manifest_path,
            workers: Some(1),
            cache_dir: None,
            remote_cache: None,
            targets: Vec::new(),
        };
        let summary = run(&options).unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.total, 1);
        let _ = BuildStatus::Success;
    }
}
