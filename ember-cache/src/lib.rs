//! Two-tier content-addressed cache with a remote tier and a unifying
//! coordinator.
//!
//! The target cache ([`store::Tag::Target`]) makes coarse whole-target skip
//! decisions; the action cache ([`store::Tag::Action`]) makes per-action
//! decisions one level finer. Both share one on-disk [`store::Cache`]
//! implementation and are driven through [`coordinator::CacheCoordinator`],
//! the single facade the scheduler talks to. An optional
//! [`remote::RemoteCache`] lets a coordinator replicate artifacts for
//! distributed execution without knowing anything about how that execution
//! is dispatched.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod coordinator;
pub mod entry;
pub mod events;
pub mod key;
pub mod remote;
pub mod store;

pub use coordinator::{CacheCoordinator, CoordinatorStats};
pub use entry::CacheEntry;
pub use events::{CacheEvent, CacheEventSubscriber, FnSubscriber};
pub use key::{ActionKey, TargetKey};
pub use remote::{BazelRemoteClient, RemoteCache, RemoteError};
pub use store::{Artifact, Cache, CacheError, CacheStats, Tag};
