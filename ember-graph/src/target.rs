//! A declared unit of buildable work.

use crate::config::ConfigValue;
use std::collections::HashMap;
use std::path::PathBuf;

/// The kind of artifact a target produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    /// Produces a runnable binary.
    Executable,
    /// Produces a library artifact consumed by other targets.
    Library,
    /// Produces no artifact; running it exercises assertions.
    Test,
    /// A kind the core has no built-in meaning for, named by the DSL.
    Custom(String),
}

/// A declared unit of work: the immutable output of workspace parsing.
///
/// Created once, at workspace parse time (parsing itself is out of this
/// crate's scope — the external parser trait hands back a validated list of
/// these). Never mutated afterward; [`crate::node::BuildNode`] is the
/// mutable, scheduler-owned counterpart.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Stable, namespaced identifier, e.g. `//pkg:name`.
    pub id: String,
    /// What this target produces.
    pub kind: TargetKind,
    /// The language driver tag this target is built with, e.g. `"rust"`.
    pub language: String,
    /// Ordered source paths, relative to the workspace root.
    pub sources: Vec<PathBuf>,
    /// Ordered identifiers of other targets this one depends on.
    pub dependencies: Vec<String>,
    /// Freeform command-line-style flags passed to the driver.
    pub flags: Vec<String>,
    /// A hint for where this target's primary output should land.
    pub output_hint: Option<PathBuf>,
    /// Freeform per-language configuration.
    pub config: HashMap<String, ConfigValue>,
}

impl Target {
    /// Construct a target with no dependencies, flags, or configuration —
    /// the common case in tests.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: TargetKind, language: impl Into<String>, sources: Vec<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind,
            language: language.into(),
            sources,
            dependencies: Vec::new(),
            flags: Vec::new(),
            output_hint: None,
            config: HashMap::new(),
        }
    }

    /// Builder-style: append a dependency identifier.
    #[must_use]
    pub fn depends_on(mut self, target_id: impl Into<String>) -> Self {
        self.dependencies.push(target_id.into());
        self
    }

    /// Builder-style: append a flag.
    #[must_use]
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Builder-style: set a configuration entry.
    #[must_use]
    pub fn config_entry(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        let _ = self.config.insert(key.into(), value);
        self
    }
}
