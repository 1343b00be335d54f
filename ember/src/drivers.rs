//! The two concrete [`LanguageDriver`] implementations this binary ships
//! (§9's "NullDriver ... and a ShellDriver"). Real per-language compiler
//! invocation is an explicit Non-goal — these exist for Scenario A/B/C-style
//! dogfooding and for the `ember build` command to have something runnable
//! without a real toolchain on hand.

use ember_scheduler::{DriverFailure, Import, InvokeOutcome, LanguageDriver};
use ember_sandbox::HermeticSpec;
use std::path::PathBuf;
use std::process::Command;

/// A driver that declares every source as its own input, produces no
/// outputs beyond what the target already names, and always succeeds
/// without running anything. Used for Scenario A/B/C-style tests and for
/// dry-run graph/scheduler exercises where no real compiler is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDriver;

impl LanguageDriver for NullDriver {
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
        "null-1".to_string()
    }
}

/// A driver that runs a fixed shell command for local dogfooding, reading it
/// back out of the constructed [`HermeticSpec`]'s environment under the
/// `EMBER_SHELL_CMD` key rather than the trait carrying a command
/// parameter — see `DESIGN.md` on why `LanguageDriver::invoke` takes only a
/// spec.
///
/// This bypasses the namespace-isolated [`ember_sandbox::Sandbox`] in favor
/// of a plain child process: the namespace monitor needs privileges this
/// CLI should not assume it has, and a dogfooding driver trades isolation
/// for running anywhere `/bin/sh` exists.
pub struct ShellDriver {
    workspace_root: PathBuf,
}

impl ShellDriver {
    /// Construct a driver that runs commands with `workspace_root` as the
    /// working directory.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self { workspace_root: workspace_root.into() }
    }
}

impl LanguageDriver for ShellDriver {
    fn analyze_imports(&self, _sources: &[PathBuf]) -> Vec<Import> {
        Vec::new()
    }

    fn declare_inputs(&self, sources: &[PathBuf]) -> Vec<PathBuf> {
        sources.to_vec()
    }

    fn declare_outputs(&self, output_hint: Option<&PathBuf>) -> Vec<PathBuf> {
        output_hint.cloned().into_iter().collect()
    }

    fn invoke(&self, spec: &HermeticSpec) -> Result<InvokeOutcome, DriverFailure> {
        let Some(command) = spec.env().get("EMBER_SHELL_CMD") else {
            return Err(DriverFailure {
                message: "shell target declared no EMBER_SHELL_CMD config entry".to_string(),
                exit_code: None,
                transient: false,
            });
        };

        let mut child = Command::new("/bin/sh");
        child.arg("-c").arg(command).current_dir(&self.workspace_root);
        for (key, value) in spec.env() {
            let _ = child.env(key, value);
        }
        let output = child.output().map_err(|e| DriverFailure {
            message: format!("failed to spawn shell: {e}"),
            exit_code: None,
            transient: true,
        })?;

        if !output.status.success() {
            return Err(DriverFailure {
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code(),
                transient: false,
            });
        }

        Ok(InvokeOutcome {
            output_paths: spec.outputs().to_vec(),
            warnings: Vec::new(),
            diagnostics: vec![String::from_utf8_lossy(&output.stdout).into_owned()],
        })
    }

    fn version(&self) -> String {
        "shell-1".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_sandbox::SandboxBuilder;

    #[test]
    fn null_driver_always_succeeds() {
        let spec = SandboxBuilder::new().skip_fs_checks().build().unwrap();
        let outcome = NullDriver.invoke(&spec).unwrap();
        assert!(outcome.output_paths.is_empty());
    }

    #[test]
    fn shell_driver_runs_the_configured_command() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SandboxBuilder::new()
            .skip_fs_checks()
            .env("EMBER_SHELL_CMD", "echo hello > out.txt")
            .output("out.txt")
            .build()
            .unwrap();
        let driver = ShellDriver::new(dir.path());
        let outcome = driver.invoke(&spec).unwrap();
        assert_eq!(outcome.output_paths, vec![PathBuf::from("out.txt")]);
        assert!(dir.path().join("out.txt").exists());
    }

    #[test]
    fn shell_driver_without_command_fails_fast() {
        let spec = SandboxBuilder::new().skip_fs_checks().build().unwrap();
        let driver = ShellDriver::new(std::env::temp_dir());
        let err = driver.invoke(&spec).unwrap_err();
        assert!(!err.transient);
    }

    #[test]
    fn shell_driver_reports_non_transient_failure_on_nonzero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let spec = SandboxBuilder::new().skip_fs_checks().env("EMBER_SHELL_CMD", "exit 3").build().unwrap();
        let driver = ShellDriver::new(dir.path());
        let err = driver.invoke(&spec).unwrap_err();
        assert_eq!(err.exit_code, Some(3));
        assert!(!err.transient);
    }
}
