//! Build graph: static construction from a declared target list, topological
//! readiness tracking, and runtime mutation for dynamically discovered
//! dependencies.
//!
//! [`graph::BuildGraph`] is the scheduler's sole view of "what can run next":
//! it holds one [`node::BuildNode`] per [`target::Target`], indexed by id
//! rather than by direct pointer (see spec's "cross-references" design
//! note), tracks the ready set under a single write lock, and accepts
//! batched [`graph::Discovery`] records as actions run and report new
//! dependencies.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod config;
pub mod graph;
pub mod node;
pub mod target;

pub use config::ConfigValue;
pub use graph::{BuildGraph, Discovery, GraphError, GraphResult, ReplayEntry};
pub use node::{BuildNode, BuildStatus, NodeId};
pub use target::{Target, TargetKind};
