//! Hermetic action specification, validating builder, wire codec and
//! platform sandbox monitor.
//!
//! [`HermeticSpec`] describes the isolation an action runs under —
//! declared inputs, outputs, scratch space, environment, network policy
//! and resource limits — without naming the command itself. A language
//! driver builds one with [`SandboxBuilder`], hands it to [`Sandbox`] along
//! with a command to run, and the two wire functions [`encode`]/[`decode`]
//! let a spec cross a process or network boundary (e.g. to a remote
//! executor) unchanged.

#![warn(missing_docs)]
#![warn(unused_results)]

pub mod codec;
pub mod execute;
pub mod spec;

pub use codec::{decode, encode, CodecError};
pub use execute::{ExecutionOutput, Sandbox, SandboxError};
pub use spec::{BuildError, HermeticSpec, NetworkPolicy, ResourceLimits, SandboxBuilder};
