//! Sandbox execution using Linux namespaces and bind mounts.
//!
//! A [`HermeticSpec`] is declarative: it names inputs, outputs, temps, env
//! and limits but embeds no command. This module is the platform monitor
//! that binds a command to a spec and runs it isolated, then reports
//! resource-limit violations as typed [`SandboxError`]s per §7 of the
//! specification this crate implements (`OOM`, `CpuExceeded`,
//! `ProcessExceeded`, wall-clock timeout, disallowed network access, missing
//! declared output).
//!
//! Non-Linux platforms get a stub that reports
//! [`SandboxError::UnsupportedPlatform`] — the equivalent facility (e.g.
//! Windows Job Objects, macOS sandbox-exec) is future work, consistent with
//! spec.md §5's "cgroups on Linux, the equivalent facility elsewhere".

use crate::spec::HermeticSpec;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors the sandbox monitor can report for a single action.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Creating or entering a namespace failed.
    #[error("failed to create namespace: {0}")]
    Namespace(String),

    /// A bind/overlay/tmpfs mount failed.
    #[error("mount failed: {0}")]
    Mount(String),

    /// The child process could not be spawned or waited on.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The action exceeded its memory limit.
    #[error("memory limit exceeded: used more than {limit_bytes} bytes")]
    Oom {
        /// The configured limit that was exceeded.
        limit_bytes: u64,
    },

    /// The action exceeded its CPU time limit.
    #[error("CPU time limit exceeded: more than {limit_ms}ms")]
    CpuExceeded {
        /// The configured limit that was exceeded.
        limit_ms: u64,
    },

    /// The action spawned more processes than allowed.
    #[error("process count limit exceeded: more than {limit}")]
    ProcessExceeded {
        /// The configured limit that was exceeded.
        limit: u32,
    },

    /// The action exceeded its wall-clock timeout.
    #[error("wall-clock timeout exceeded: more than {limit_ms}ms")]
    WallClockExceeded {
        /// The configured timeout that was exceeded.
        limit_ms: u64,
    },

    /// The action attempted network access disallowed by its policy.
    #[error("disallowed network access: {0}")]
    NetworkDenied(String),

    /// A declared output path was not produced by the action.
    #[error("declared output not produced: {}", .0.display())]
    OutputNotProduced(PathBuf),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// This platform has no sandbox monitor implementation.
    #[error("sandbox execution is not supported on this platform")]
    UnsupportedPlatform,
}

/// Result of a single sandboxed command invocation.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    /// Process exit code, if the process ran to completion.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
}

/// Executes a bound command inside the isolation described by a
/// [`HermeticSpec`].
pub struct Sandbox {
    spec: HermeticSpec,
    /// Scratch root on the host filesystem used to stage mounts and logs.
    sandbox_root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox for `spec`, staged under `sandbox_root`.
    #[must_use]
    pub fn new(spec: HermeticSpec, sandbox_root: PathBuf) -> Self {
        Self { spec, sandbox_root }
    }

    /// The spec this sandbox enforces.
    #[must_use]
    pub fn spec(&self) -> &HermeticSpec {
        &self.spec
    }

    /// Run `command` (argv, no shell interpretation) inside the sandbox.
    ///
    /// # Errors
    ///
    /// Returns a [`SandboxError`] variant describing the first violation or
    /// failure encountered. On non-Linux platforms this always returns
    /// [`SandboxError::UnsupportedPlatform`].
    pub fn execute(&self, command: &[String]) -> Result<ExecutionOutput, SandboxError> {
        #[cfg(target_os = "linux")]
        {
            linux::execute(self, command)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = command;
            Err(SandboxError::UnsupportedPlatform)
        }
    }

    /// Verify that every declared output exists after execution.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::OutputNotProduced`] naming the first missing output.
    pub fn verify_outputs(&self) -> Result<(), SandboxError> {
        for output in self.spec.outputs() {
            let full = self.sandbox_root.join(output);
            if !full.exists() {
                return Err(SandboxError::OutputNotProduced(output.clone()));
            }
        }
        Ok(())
    }

    fn setup_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.sandbox_root)?;
        std::fs::create_dir_all(self.sandbox_root.join("work"))?;
        for temp in self.spec.temps() {
            std::fs::create_dir_all(self.sandbox_root.join(temp))?;
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{ExecutionOutput, Sandbox, SandboxError};
    use crate::spec::NetworkPolicy;
    use nix::mount::{mount, MsFlags};
    use nix::sched::{unshare, CloneFlags};
    use nix::sys::resource::{setrlimit, Resource};
    use nix::sys::signal::{self, Signal};
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::{chdir, fork, ForkResult};
    use std::fs::File;
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;
    use std::time::{Duration, Instant};

    /// Poll interval while waiting (non-blocking) for the child so the
    /// wall-clock deadline can be enforced without a dedicated watcher thread.
    const POLL_INTERVAL: Duration = Duration::from_millis(5);

    pub(super) fn execute(sandbox: &Sandbox, command: &[String]) -> Result<ExecutionOutput, SandboxError> {
        sandbox.setup_dirs()?;
        let start = Instant::now();

        // SAFETY: called before any additional threads are spawned in this
        // process; the child immediately either execs or calls
        // `std::process::exit`, never unwinding back through caller frames.
        match unsafe { fork() }.map_err(|e| SandboxError::Namespace(e.to_string()))? {
            ForkResult::Parent { child } => {
                let deadline = (sandbox.spec().timeout_ms() > 0)
                    .then(|| start + Duration::from_millis(sandbox.spec().timeout_ms()));
                let status = loop {
                    match waitpid(child, Some(WaitPidFlag::WNOHANG)).map_err(|e| SandboxError::Execution(e.to_string()))? {
                        WaitStatus::StillAlive => {
                            if let Some(deadline) = deadline {
                                if Instant::now() >= deadline {
                                    let _ = signal::kill(child, Signal::SIGKILL);
                                    let _ = waitpid(child, None);
                                    return Err(SandboxError::WallClockExceeded { limit_ms: sandbox.spec().timeout_ms() });
                                }
                            }
                            std::thread::sleep(POLL_INTERVAL);
                        }
                        other => break other,
                    }
                };
                let duration = start.elapsed();
                match status {
                    WaitStatus::Exited(_, code) => {
                        let stdout = std::fs::read(sandbox.sandbox_root.join("stdout.log")).unwrap_or_default();
                        let stderr = std::fs::read(sandbox.sandbox_root.join("stderr.log")).unwrap_or_default();
                        Ok(ExecutionOutput {
                            exit_code: code,
                            stdout,
                            stderr,
                            duration,
                        })
                    }
                    WaitStatus::Signaled(_, Signal::SIGXCPU, _) => {
                        let limit_ms = sandbox.spec().resource_limits().max_cpu_time_ms.unwrap_or(0);
                        Err(SandboxError::CpuExceeded { limit_ms })
                    }
                    WaitStatus::Signaled(_, signal @ (Signal::SIGKILL | Signal::SIGSEGV | Signal::SIGBUS), _)
                        if sandbox.spec().resource_limits().max_memory_bytes.is_some() =>
                    {
                        let _ = signal;
                        let limit_bytes = sandbox.spec().resource_limits().max_memory_bytes.unwrap_or(0);
                        Err(SandboxError::Oom { limit_bytes })
                    }
                    other => Err(SandboxError::Execution(format!("child ended unexpectedly: {other:?}"))),
                }
            }
            ForkResult::Child => match run_child(sandbox, command) {
                Ok(status) => std::process::exit(status),
                Err(e) => {
                    eprintln!("sandbox child setup failed: {e}");
                    std::process::exit(127);
                }
            },
        }
    }

    fn run_child(sandbox: &Sandbox, command: &[String]) -> Result<i32, SandboxError> {
        let mut clone_flags = CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWPID;
        if matches!(sandbox.spec().network(), NetworkPolicy::Hermetic) {
            clone_flags |= CloneFlags::CLONE_NEWNET;
        }
        unshare(clone_flags).map_err(|e| SandboxError::Namespace(e.to_string()))?;

        apply_resource_limits(sandbox).map_err(|e| SandboxError::Namespace(e.to_string()))?;

        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_PRIVATE | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| SandboxError::Mount(e.to_string()))?;

        bind_inputs_readonly(sandbox)?;

        let work_dir = sandbox.sandbox_root.join("work");
        chdir(&work_dir).map_err(|e| SandboxError::Mount(e.to_string()))?;

        let stdout_file = File::create(sandbox.sandbox_root.join("stdout.log"))?;
        let stderr_file = File::create(sandbox.sandbox_root.join("stderr.log"))?;

        let Some((program, args)) = command.split_first() else {
            return Err(SandboxError::Execution("empty command".to_string()));
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&work_dir).stdout(stdout_file).stderr(stderr_file);
        for (k, v) in sandbox.spec().env() {
            cmd.env(k, v);
        }

        let status = cmd.status().map_err(|e| classify_spawn_failure(sandbox, &e))?;
        Ok(status.code().unwrap_or_else(|| 128 + status.signal().unwrap_or(0)))
    }

    /// Apply `RLIMIT_AS`/`RLIMIT_CPU`/`RLIMIT_NPROC` from the spec's
    /// [`crate::spec::ResourceLimits`] to the current (post-fork, pre-exec)
    /// process. An exceeded limit surfaces as a signal the parent maps back
    /// to a typed [`SandboxError`] (`SIGXCPU` -> `CpuExceeded`, `SIGKILL`/
    /// `SIGSEGV` with a memory limit configured -> `Oom`).
    fn apply_resource_limits(sandbox: &Sandbox) -> nix::Result<()> {
        let limits = sandbox.spec().resource_limits();
        if let Some(max_memory_bytes) = limits.max_memory_bytes {
            setrlimit(Resource::RLIMIT_AS, max_memory_bytes, max_memory_bytes)?;
        }
        if let Some(max_cpu_time_ms) = limits.max_cpu_time_ms {
            let seconds = max_cpu_time_ms.div_ceil(1000).max(1);
            setrlimit(Resource::RLIMIT_CPU, seconds, seconds)?;
        }
        if let Some(max_processes) = limits.max_processes {
            setrlimit(Resource::RLIMIT_NPROC, u64::from(max_processes), u64::from(max_processes))?;
        }
        Ok(())
    }

    /// Spawning the command itself can fail rather than the spawned process
    /// running and being signalled: exceeding `RLIMIT_NPROC` makes the
    /// `fork` inside `Command::status` fail with `EAGAIN` instead of handing
    /// back a live child to `waitpid`. Map that case back to
    /// [`SandboxError::ProcessExceeded`]; anything else is a generic
    /// execution failure.
    fn classify_spawn_failure(sandbox: &Sandbox, e: &std::io::Error) -> SandboxError {
        let eagain = nix::errno::Errno::EAGAIN as i32;
        if let (Some(limit), Some(code)) = (sandbox.spec().resource_limits().max_processes, e.raw_os_error()) {
            if code == eagain {
                return SandboxError::ProcessExceeded { limit };
            }
        }
        SandboxError::Execution(e.to_string())
    }

    fn bind_inputs_readonly(sandbox: &Sandbox) -> Result<(), SandboxError> {
        for input in sandbox.spec().inputs() {
            let target = sandbox.sandbox_root.join("work").join(input);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if input.is_dir() {
                std::fs::create_dir_all(&target)?;
            } else {
                std::fs::File::create(&target)?;
            }
            mount(
                Some(input.as_path()),
                &target,
                None::<&str>,
                MsFlags::MS_BIND,
                None::<&str>,
            )
            .map_err(|e| SandboxError::Mount(format!("bind {} -> {}: {e}", input.display(), target.display())))?;
            mount(
                None::<&str>,
                &target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )
            .map_err(|e| SandboxError::Mount(format!("remount ro {}: {e}", target.display())))?;
        }
        Ok(())
    }
}
