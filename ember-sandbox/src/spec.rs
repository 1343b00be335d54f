//! The [`HermeticSpec`] type and its validating builder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Network policy enforced by the sandbox around an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkPolicy {
    /// No network access of any kind.
    Hermetic,
    /// Outbound access permitted to exactly the listed hosts.
    AllowHosts(Vec<String>),
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        NetworkPolicy::Hermetic
    }
}

/// Resource limits enforced by the platform monitor (cgroups on Linux).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceLimits {
    /// Maximum resident memory, in bytes. `None` means unspecified (platform default).
    pub max_memory_bytes: Option<u64>,
    /// Maximum CPU time, in milliseconds. `None` means unspecified.
    pub max_cpu_time_ms: Option<u64>,
    /// Maximum number of processes/threads the action may create. `None` means unspecified.
    ///
    /// This field is enforced locally (via cgroup `pids.max` on Linux) but is
    /// not part of the wire codec in [`crate::codec`] — see `DESIGN.md` for
    /// why the wire format's three `u64` fields cover memory, CPU time and
    /// wall-clock timeout only.
    pub max_processes: Option<u32>,
}

/// A fully validated, immutable description of a sandboxed action's
/// environment. `HermeticSpec` never embeds a command: the language driver
/// binds a command separately and executes it inside the sandbox this spec
/// describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HermeticSpec {
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    temps: Vec<PathBuf>,
    env: BTreeMap<String, String>,
    network: NetworkPolicy,
    resource_limits: ResourceLimits,
    /// Wall-clock timeout for the whole action, in milliseconds.
    timeout_ms: u64,
}

impl HermeticSpec {
    /// Declared input paths, in builder-insertion order.
    #[must_use]
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Declared output paths, in builder-insertion order.
    #[must_use]
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// Declared scratch (temp) paths, in builder-insertion order.
    #[must_use]
    pub fn temps(&self) -> &[PathBuf] {
        &self.temps
    }

    /// Environment variables visible inside the sandbox, sorted by key.
    #[must_use]
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// The network policy in effect for this action.
    #[must_use]
    pub fn network(&self) -> &NetworkPolicy {
        &self.network
    }

    /// Resource limits in effect for this action.
    #[must_use]
    pub fn resource_limits(&self) -> ResourceLimits {
        self.resource_limits
    }

    /// Wall-clock timeout, in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}

/// Errors raised while constructing a [`HermeticSpec`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// A declared input path does not exist on disk.
    #[error("declared input does not exist: {0}")]
    InputMissing(String),

    /// A declared output path's parent directory is not a writable location.
    #[error("declared output is not in a writable location: {0}")]
    OutputNotWritable(String),

    /// An environment variable key or value contained a NUL byte.
    #[error("environment variable {0:?} contains a NUL byte")]
    EnvContainsNul(String),

    /// A resource limit was given as zero or otherwise non-positive.
    #[error("resource limit {0} must be positive")]
    NonPositiveLimit(&'static str),

    /// The network policy named zero hosts in an `AllowHosts` list.
    #[error("AllowHosts policy must name at least one host")]
    EmptyHostList,
}

/// Builder for [`HermeticSpec`]. Validates on [`SandboxBuilder::build`]; a
/// `HermeticSpec` that is successfully built is guaranteed to be one the
/// sandbox can enforce.
#[derive(Debug, Default)]
pub struct SandboxBuilder {
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    temps: Vec<PathBuf>,
    env: BTreeMap<String, String>,
    network: NetworkPolicy,
    resource_limits: ResourceLimits,
    timeout_ms: u64,
    /// When set, skips the filesystem existence check on inputs — used by
    /// tests and by callers building a spec to decode/encode only.
    skip_fs_checks: bool,
}

impl SandboxBuilder {
    /// Start a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout_ms: 0,
            ..Default::default()
        }
    }

    /// Declare an input path. Must exist at `build()` time unless
    /// [`Self::skip_fs_checks`] was called.
    #[must_use]
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    /// Declare an output path.
    #[must_use]
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Declare a scratch/temp path.
    #[must_use]
    pub fn temp(mut self, path: impl Into<PathBuf>) -> Self {
        self.temps.push(path.into());
        self
    }

    /// Set an environment variable visible inside the sandbox.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.env.insert(key.into(), value.into());
        self
    }

    /// Set the network policy (default: [`NetworkPolicy::Hermetic`]).
    #[must_use]
    pub fn network(mut self, policy: NetworkPolicy) -> Self {
        self.network = policy;
        self
    }

    /// Set resource limits (default: all unspecified).
    #[must_use]
    pub fn resource_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    /// Set the wall-clock timeout, in milliseconds.
    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Skip the filesystem existence check on declared inputs. Intended for
    /// tests and for codec round-trip construction where the paths are
    /// symbolic and not expected to exist on the machine running the test.
    #[must_use]
    pub fn skip_fs_checks(mut self) -> Self {
        self.skip_fs_checks = true;
        self
    }

    /// Validate and build the spec.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] describing the first violation found: a
    /// missing input, an output in a non-writable location, a NUL byte in an
    /// environment key/value, a non-positive resource limit, or an empty
    /// `AllowHosts` list.
    pub fn build(self) -> Result<HermeticSpec, BuildError> {
        if !self.skip_fs_checks {
            for input in &self.inputs {
                if !input.exists() {
                    return Err(BuildError::InputMissing(input.display().to_string()));
                }
            }
        }

        for output in &self.outputs {
            if let Some(parent) = output.parent() {
                if !self.skip_fs_checks && parent.as_os_str().len() > 0 && !parent.exists() {
                    return Err(BuildError::OutputNotWritable(output.display().to_string()));
                }
            }
        }

        for (k, v) in &self.env {
            if k.as_bytes().contains(&0) || v.as_bytes().contains(&0) {
                return Err(BuildError::EnvContainsNul(k.clone()));
            }
        }

        if let NetworkPolicy::AllowHosts(hosts) = &self.network {
            if hosts.is_empty() {
                return Err(BuildError::EmptyHostList);
            }
        }

        let limits = self.resource_limits;
        if limits.max_memory_bytes == Some(0) {
            return Err(BuildError::NonPositiveLimit("max_memory_bytes"));
        }
        if limits.max_cpu_time_ms == Some(0) {
            return Err(BuildError::NonPositiveLimit("max_cpu_time_ms"));
        }
        if limits.max_processes == Some(0) {
            return Err(BuildError::NonPositiveLimit("max_processes"));
        }

        Ok(HermeticSpec {
            inputs: self.inputs,
            outputs: self.outputs,
            temps: self.temps,
            env: self.env,
            network: self.network,
            resource_limits: limits,
            timeout_ms: self.timeout_ms,
        })
    }
}

impl HermeticSpec {
    /// Construct a spec directly from its parts, bypassing [`SandboxBuilder`]
    /// validation. Used only by [`crate::codec`] when reconstructing a spec
    /// from the wire: the bytes were produced by encoding an already-valid
    /// spec, so re-validating would be redundant (and would wrongly reject
    /// codec-internal reserved env entries before they are stripped out).
    pub(crate) fn from_parts(
        inputs: Vec<PathBuf>,
        outputs: Vec<PathBuf>,
        temps: Vec<PathBuf>,
        env: BTreeMap<String, String>,
        network: NetworkPolicy,
        resource_limits: ResourceLimits,
        timeout_ms: u64,
    ) -> Self {
        Self {
            inputs,
            outputs,
            temps,
            env,
            network,
            resource_limits,
            timeout_ms,
        }
    }
}

/// Convenience: true if `path`'s nearest existing ancestor is a directory.
#[must_use]
pub fn nearest_existing_ancestor_is_dir(path: &Path) -> bool {
    let mut cur = path.parent();
    while let Some(p) = cur {
        if p.exists() {
            return p.is_dir();
        }
        cur = p.parent();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_succeeds_with_no_inputs() {
        let spec = SandboxBuilder::new().build().unwrap();
        assert!(spec.inputs().is_empty());
        assert_eq!(spec.network(), &NetworkPolicy::Hermetic);
    }

    #[test]
    fn build_fails_on_missing_input() {
        let err = SandboxBuilder::new()
            .input("/definitely/does/not/exist/ever")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::InputMissing(_)));
    }

    #[test]
    fn skip_fs_checks_allows_symbolic_paths() {
        let spec = SandboxBuilder::new()
            .input("src/a.c")
            .output("out/a.o")
            .skip_fs_checks()
            .build()
            .unwrap();
        assert_eq!(spec.inputs(), &[PathBuf::from("src/a.c")]);
    }

    #[test]
    fn build_fails_on_nul_in_env() {
        let err = SandboxBuilder::new()
            .env("BAD\0KEY", "value")
            .skip_fs_checks()
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::EnvContainsNul(_)));
    }

    #[test]
    fn build_fails_on_zero_resource_limit() {
        let err = SandboxBuilder::new()
            .resource_limits(ResourceLimits {
                max_memory_bytes: Some(0),
                ..Default::default()
            })
            .skip_fs_checks()
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::NonPositiveLimit("max_memory_bytes"));
    }

    #[test]
    fn build_fails_on_empty_allow_hosts() {
        let err = SandboxBuilder::new()
            .network(NetworkPolicy::AllowHosts(Vec::new()))
            .skip_fs_checks()
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::EmptyHostList);
    }

    #[test]
    fn env_is_sorted_by_key() {
        let spec = SandboxBuilder::new()
            .env("ZEBRA", "1")
            .env("ALPHA", "2")
            .skip_fs_checks()
            .build()
            .unwrap();
        let keys: Vec<_> = spec.env().keys().collect();
        assert_eq!(keys, vec!["ALPHA", "ZEBRA"]);
    }
}
