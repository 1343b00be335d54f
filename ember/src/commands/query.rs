//! `ember query`: load a workspace, build the graph, and evaluate one
//! `deps()`/`rdeps()`/`path()` expression against it — no scheduler, no
//! cache, just the graph's adjacency.

use crate::error::{EmberError, EmberResult};
use crate::manifest;
use crate::query::Query;
use ember_graph::BuildGraph;
use std::path::PathBuf;

/// Run one query expression against the workspace at `manifest_path`.
///
/// # Errors
///
/// Returns [`EmberError`] if the manifest cannot be loaded, the graph cannot
/// be built, or the expression is malformed or names an unknown target.
pub fn run(manifest_path: &PathBuf, expr: &str) -> EmberResult<Vec<String>> {
    let workspace = manifest::load(manifest_path).map_err(|source| EmberError::Manifest {
        path: manifest_path.display().to_string(),
        source: source.into(),
    })?;
    let graph = BuildGraph::new(workspace.targets)?;
    let query = Query::parse(expr).map_err(EmberError::Query)?;
    let results = query.evaluate(&graph).map_err(EmberError::Query)?;
    Ok(results.into_iter().map(|id| id.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &std::path::Path) -> PathBuf {
        let manifest_path = dir.join("ember.toml");
        std::fs::write(
            &manifest_path,
            r#"
            [[target]]
            id = "//a:lib"
            kind = "library"
            language = "rust"
            sources = []

            [[target]]
            id = "//a:app"
            kind = "executable"
            language = "rust"
            sources = []
            dependencies = ["//a:lib"]
            "#,
        )
        .unwrap();
        manifest_path
    }

    #[test]
    fn deps_resolves_through_the_loaded_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = write_manifest(dir.path());
        let results = run(&manifest_path, "deps(//a:app)").unwrap();
        assert_eq!(results, vec!["//a:lib".to_string()]);
    }

    #[test]
    fn unknown_target_surfaces_as_query_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = write_manifest(dir.path());
        let err = run(&manifest_path, "deps(//missing)").unwrap_err();
        assert!(matches!(err, EmberError::Query(_)));
    }
}
