//! The workspace manifest: `ember.toml`, read with `serde` + `toml` the way
//! the teacher's `convenient-kas` reads its YAML manifest plus CLI split
//! (`KasIncludeGraph::build` in `convenient-kas/src/include_graph.rs`).
//!
//! This is *not* the build DSL spec.md's §1 places out of scope — it is a
//! thin, already-declarative target list a test-only in-memory parser would
//! otherwise hand the core directly. Real workspace definitions (BUILD
//! files, a proper DSL) are a language-driver-author's problem; this file
//! format exists purely so the `ember` binary has something concrete to
//! load from disk.

use ember_graph::{ConfigValue, Target, TargetKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or interpreting a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read from disk.
    #[error("could not read {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest's TOML could not be parsed.
    #[error("could not parse {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A target named a `kind` this crate does not recognize.
    #[error("target {target} has unknown kind {kind:?}")]
    UnknownKind {
        /// The target that declared the bad kind.
        target: String,
        /// The unrecognized string.
        kind: String,
    },
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, Deserialize, Default)]
struct ManifestFile {
    #[serde(default)]
    workspace: WorkspaceSection,
    #[serde(default, rename = "target")]
    targets: Vec<ManifestTarget>,
}

/// The `[workspace]` table: everything that is not a target declaration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkspaceSection {
    /// Worker thread count; `None` defers to `num_cpus::get()`.
    pub workers: Option<usize>,
    /// Cache root, relative to the manifest's directory unless absolute.
    pub cache_dir: PathBuf,
    /// Byte budget for each cache tier; `0` means unbounded.
    pub cache_byte_budget: u64,
    /// Optional Bazel Remote Execution API v2 base URL.
    pub remote_cache: Option<String>,
    /// Whether a failed target cancels its downstream subgraph.
    pub cancel_on_failure: bool,
    /// Default per-action wall-clock timeout, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            workers: None,
            cache_dir: PathBuf::from(".ember-cache"),
            cache_byte_budget: 0,
            remote_cache: None,
            cancel_on_failure: true,
            timeout_ms: ember_scheduler::DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
struct ManifestTarget {
    id: String,
    kind: String,
    language: String,
    #[serde(default)]
    sources: Vec<PathBuf>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    flags: Vec<String>,
    output: Option<PathBuf>,
    #[serde(default)]
    config: BTreeMap<String, toml::Value>,
}

/// A fully loaded workspace: its ambient settings plus the declared targets.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// The directory the manifest was loaded from; source/output paths in
    /// `targets` are relative to it.
    pub root: PathBuf,
    /// Ambient build settings.
    pub settings: WorkspaceSection,
    /// The declared target list, ready to hand to `BuildGraph::new`.
    pub targets: Vec<Target>,
}

/// Load and validate a workspace manifest from `path`.
///
/// # Errors
///
/// Returns [`ManifestError`] if the file cannot be read, parsed, or names a
/// target with an unrecognized `kind`.
pub fn load(path: &Path) -> ManifestResult<Workspace> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let parsed: ManifestFile = toml::from_str(&text).map_err(|source| ManifestError::Parse {
        path: path.display().to_string(),
        source,
    })?;

    let root = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let mut targets = Vec::with_capacity(parsed.targets.len());
    for manifest_target in parsed.targets {
        targets.push(to_target(manifest_target)?);
    }

    Ok(Workspace { root, settings: parsed.workspace, targets })
}

fn to_target(manifest_target: ManifestTarget) -> ManifestResult<Target> {
    let kind = parse_kind(&manifest_target.id, &manifest_target.kind)?;
    let mut target = Target::new(manifest_target.id, kind, manifest_target.language, manifest_target.sources);
    for dep in manifest_target.dependencies {
        target = target.depends_on(dep);
    }
    for flag in manifest_target.flags {
        target = target.flag(flag);
    }
    target.output_hint = manifest_target.output;
    for (key, value) in manifest_target.config {
        target = target.config_entry(key, toml_to_config_value(&value));
    }
    Ok(target)
}

fn parse_kind(target_id: &str, kind: &str) -> ManifestResult<TargetKind> {
    match kind {
        "executable" => Ok(TargetKind::Executable),
        "library" => Ok(TargetKind::Library),
        "test" => Ok(TargetKind::Test),
        other => match other.strip_prefix("custom:") {
            Some(name) => Ok(TargetKind::Custom(name.to_string())),
            None => Err(ManifestError::UnknownKind { target: target_id.to_string(), kind: kind.to_string() }),
        },
    }
}

fn toml_to_config_value(value: &toml::Value) -> ConfigValue {
    match value {
        toml::Value::String(s) => ConfigValue::String(s.clone()),
        toml::Value::Integer(n) => ConfigValue::Number(*n as f64),
        toml::Value::Float(n) => ConfigValue::Number(*n),
        toml::Value::Boolean(b) => ConfigValue::Bool(*b),
        toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
        toml::Value::Array(items) => ConfigValue::Array(items.iter().map(toml_to_config_value).collect()),
        toml::Value::Table(entries) => {
            let mut map = std::collections::BTreeMap::new();
            for (k, v) in entries {
                let _ = map.insert(k.clone(), toml_to_config_value(v));
            }
            ConfigValue::Map(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_two_target_chain() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), b"fn lib() {}").unwrap();
        std::fs::write(dir.path().join("main.rs"), b"fn main() {}").unwrap();
        let manifest_path = dir.path().join("ember.toml");
        std::fs::write(
            &manifest_path,
            r#"
            [workspace]
            workers = 2
            cache_byte_budget = 1048576

            [[target]]
            id = "//a:lib"
            kind = "library"
            language = "rust"
            sources = ["lib.rs"]
            output = "liba.rlib"

            [[target]]
            id = "//a:app"
            kind = "executable"
            language = "rust"
            sources = ["main.rs"]
            dependencies = ["//a:lib"]
            output = "app"
            "#,
        )
        .unwrap();

        let workspace = load(&manifest_path).unwrap();
        assert_eq!(workspace.settings.workers, Some(2));
        assert_eq!(workspace.settings.cache_byte_budget, 1_048_576);
        assert_eq!(workspace.targets.len(), 2);
        assert_eq!(workspace.targets[1].dependencies, vec!["//a:lib".to_string()]);
    }

    #[test]
    fn unknown_kind_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("ember.toml");
        std::fs::write(
            &manifest_path,
            r#"
            [[target]]
            id = "//a:x"
            kind = "bogus"
            language = "rust"
            sources = []
            "#,
        )
        .unwrap();
        let err = load(&manifest_path).unwrap_err();
        assert!(matches!(err, ManifestError::UnknownKind { .. }));
    }

    #[test]
    fn config_table_round_trips_through_digest_friendly_values() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("ember.toml");
        std::fs::write(
            &manifest_path,
            r#"
            [[target]]
            id = "//a:x"
            kind = "library"
            language = "shell"
            sources = []

            [target.config]
            opt-level = "2"
            lto = true
            "#,
        )
        .unwrap();
        let workspace = load(&manifest_path).unwrap();
        let config = &workspace.targets[0].config;
        assert_eq!(config.get("opt-level").and_then(ConfigValue::as_str), Some("2"));
        assert_eq!(config.get("lto").and_then(ConfigValue::as_bool), Some(true));
    }
}
