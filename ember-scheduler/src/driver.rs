//! The language-driver interface the executor consumes but never
//! implements (§6, §9) — compiler invocation for any specific language is
//! out of this crate's scope. A driver is a flat capability interface
//! rather than a class hierarchy, as the design notes recommend.

use ember_sandbox::HermeticSpec;
use std::path::PathBuf;

/// One import/include discovered by scanning a target's sources, surfaced
/// so the caller can resolve it to a dependency edge before the action runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// The raw module/path/package name as written in the source.
    pub raw: String,
    /// The source file the import was found in.
    pub from: PathBuf,
}

/// What a successful [`LanguageDriver::invoke`] produced.
#[derive(Debug, Clone, Default)]
pub struct InvokeOutcome {
    /// Output paths the action actually produced, relative to the sandbox root.
    pub output_paths: Vec<PathBuf>,
    /// Non-fatal diagnostics (e.g. lint warnings) the driver chose to report.
    pub warnings: Vec<String>,
    /// Any other structured diagnostics the driver wants attached to the result.
    pub diagnostics: Vec<String>,
}

/// An error a driver reports for a single invocation. The executor
/// classifies these into the core's typed error kinds (§7) at the call
/// site; the driver itself only needs to say what happened and whether it
/// looks retryable.
#[derive(Debug, Clone, thiserror::Error)]
#[error("driver reported failure (exit {exit_code:?}): {message}")]
pub struct DriverFailure {
    /// Human-readable failure description.
    pub message: String,
    /// Process exit code, if the driver shelled out to a subprocess.
    pub exit_code: Option<i32>,
    /// Whether the driver believes this failure is transient (e.g. a
    /// flaky network fetch) and therefore safe to retry under
    /// [`crate::retry::RetryPolicy`].
    pub transient: bool,
}

/// The per-language build driver capability interface (§6's
/// "Language-driver interface (consumed, not implemented)").
///
/// Implementations live outside this crate — real compiler invocation is an
/// explicit Non-goal. This crate ships only test/dogfooding drivers; see
/// the `ember` binary crate's driver registry for how a language tag maps
/// to a concrete `Arc<dyn LanguageDriver>`.
pub trait LanguageDriver: Send + Sync {
    /// Scan `sources` for imports/includes this driver understands.
    fn analyze_imports(&self, sources: &[PathBuf]) -> Vec<Import>;

    /// The input paths this driver declares for a target, given its
    /// sources — usually the sources themselves plus any driver-specific
    /// implicit inputs (e.g. a standard library stub set).
    fn declare_inputs(&self, sources: &[PathBuf]) -> Vec<PathBuf>;

    /// The output paths this driver declares for a target, given its output
    /// hint.
    fn declare_outputs(&self, output_hint: Option<&PathBuf>) -> Vec<PathBuf>;

    /// Run the action inside the constructed sandbox spec.
    ///
    /// # Errors
    ///
    /// Returns [`DriverFailure`] describing what went wrong.
    fn invoke(&self, spec: &HermeticSpec) -> Result<InvokeOutcome, DriverFailure>;

    /// A version string identifying this driver, folded into the
    /// driver-metadata digest that feeds `ActionKey` so a driver upgrade
    /// invalidates stale action-cache entries.
    fn version(&self) -> String;
}

/// Process-global registry mapping a language tag to its driver, populated
/// at startup (§9's "registrations live in a process-global registry keyed
/// by a language tag").
#[derive(Default)]
pub struct DriverRegistry {
    drivers: std::collections::HashMap<String, std::sync::Arc<dyn LanguageDriver>>,
}

impl DriverRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { drivers: std::collections::HashMap::new() }
    }

    /// Register `driver` under `language`, replacing any prior registration.
    pub fn register(&mut self, language: impl Into<String>, driver: std::sync::Arc<dyn LanguageDriver>) {
        let _ = self.drivers.insert(language.into(), driver);
    }

    /// Look up the driver registered for `language`.
    #[must_use]
    pub fn get(&self, language: &str) -> Option<std::sync::Arc<dyn LanguageDriver>> {
        self.drivers.get(language).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl LanguageDriver for Noop {
        fn analyze_imports(&self, _sources: &[PathBuf]) -> Vec<Import> {
            Vec::new()
        }
        fn declare_inputs(&self, sources: &[PathBuf]) -> Vec<PathBuf> {
            sources.to_vec()
        }
        fn declare_outputs(&self, output_hint: Option<&PathBuf>) -> Vec<PathBuf> {
            output_hint.cloned().into_iter().collect()
        }
        fn invoke(&self, _spec: &HermeticSpec) -> Result<InvokeOutcome, DriverFailure> {
            Ok(InvokeOutcome::default())
        }
        fn version(&self) -> String {
            "noop-1".to_string()
        }
    }

    #[test]
    fn registry_round_trips_a_driver() {
        let mut registry = DriverRegistry::new();
        registry.register("noop", std::sync::Arc::new(Noop));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
    }
}
