//! Top-level error type for the `ember` binary.
//!
//! Every library crate (`ember-graph`, `ember-cache`, `ember-sandbox`,
//! `ember-scheduler`) owns its own `thiserror` enum; this crate is the one
//! place those compose, matching the teacher's `bitzel::Result` alias
//! pattern (`bitzel/src/lib.rs` folds its own error sources behind
//! `Box<dyn std::error::Error>` at the binary boundary; here a named
//! `thiserror` enum plays the same role with `anyhow` reserved for CLI-only
//! failures like a malformed manifest file).

use thiserror::Error;

/// Errors that can terminate an `ember` CLI invocation.
#[derive(Debug, Error)]
pub enum EmberError {
    /// The workspace manifest (`ember.toml`) could not be read or parsed.
    #[error("failed to load manifest {path}: {source}")]
    Manifest {
        /// Path to the manifest that failed to load.
        path: String,
        /// Underlying error.
        #[source]
        source: anyhow::Error,
    },

    /// The graph could not be constructed from the manifest's targets.
    #[error(transparent)]
    Graph(#[from] ember_graph::GraphError),

    /// The cache coordinator could not be opened.
    #[error(transparent)]
    Cache(#[from] ember_cache::CacheError),

    /// The configured remote cache endpoint could not be reached or parsed.
    #[error(transparent)]
    Remote(#[from] ember_cache::RemoteError),

    /// A query expression was malformed or named an unknown target.
    #[error("query error: {0}")]
    Query(String),

    /// No target matched a name given on the command line.
    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

/// Result type used throughout the `ember` binary.
pub type EmberResult<T> = Result<T, EmberError>;
