//! `ember`: a build-graph execution core's CLI front end — `build`,
//! `query`, and `cache stats|clear`, grounded in `graph-git-cli`'s
//! `clap::Parser` derive structure and `bitzel`'s tracing-subscriber
//! initialization and emoji-prefixed progress voice.

mod commands;
mod drivers;
mod error;
mod manifest;
mod query;

use clap::{Parser, Subcommand};
use commands::build::BuildOptions;
use error::EmberResult;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// A content-addressed build graph executor.
#[derive(Parser)]
#[command(name = "ember", version, author)]
struct Cli {
    /// Path to the workspace manifest.
    #[arg(short, long, global = true, default_value = "ember.toml")]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build some or all targets in the workspace.
    Build {
        /// Restrict the build to these target ids and their dependencies;
        /// omit to build everything.
        targets: Vec<String>,
        /// Override the worker thread count.
        #[arg(short, long)]
        workers: Option<usize>,
        /// Override the cache directory.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
        /// Override the remote cache base URL.
        #[arg(long)]
        remote_cache: Option<String>,
    },
    /// Evaluate a `deps()`/`rdeps()`/`path()` expression over the graph.
    Query {
        /// The expression to evaluate, e.g. `deps(//pkg:lib)`.
        expr: String,
    },
    /// Inspect or reset the on-disk cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
        /// Override the cache directory.
        #[arg(long, default_value = ".ember-cache")]
        cache_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print hit/miss/size statistics for both cache tiers.
    Stats,
    /// Remove every entry from both cache tiers.
    Clear,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "ember=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("❌ {error}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: &Cli) -> EmberResult<()> {
    match &cli.command {
        Command::Build { targets, workers, cache_dir, remote_cache } => {
            let options = BuildOptions {
                manifest_path: cli.manifest.clone(),
                workers: *workers,
                cache_dir: cache_dir.clone(),
                remote_cache: remote_cache.clone(),
                targets: targets.clone(),
            };
            let summary = commands::build::run(&options)?;
            summary.display();
            if summary.failed > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Query { expr } => {
            let results = commands::query::run(&cli.manifest, expr)?;
            if results.is_empty() {
                println!("(no results)");
            } else {
                for id in results {
                    println!("{id}");
                }
            }
            Ok(())
        }
        Command::Cache { action, cache_dir } => match action {
            CacheAction::Stats => {
                let stats = commands::cache::stats(cache_dir)?;
                commands::cache::display_stats(&stats);
                Ok(())
            }
            CacheAction::Clear => {
                commands::cache::clear(cache_dir)?;
                println!("🧹 cache cleared: {}", cache_dir.display());
                Ok(())
            }
        },
    }
}
