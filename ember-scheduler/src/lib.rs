//! Work-stealing parallel executor with priority ordering.
//!
//! Three layers compose into the scheduler: [`priority`] defines what a
//! queued unit of work looks like and how tiers order against each other;
//! [`global_queue`] and [`deque`] are the two places work can sit (a shared
//! four-tier queue, or a worker's own LIFO deque); [`scheduler`] ties them
//! together into a running pool of worker threads with random-victim
//! stealing. [`executor`] is the build-specific consumer: it turns one
//! graph node into cache lookups and a sandboxed driver invocation, and is
//! what callers actually submit to the pool. [`driver`] is the capability
//! interface the executor dispatches through but never implements, and
//! [`retry`]/[`events`] are the cross-cutting policy and observability
//! pieces both the executor and a future CLI layer share.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod deque;
pub mod driver;
pub mod events;
pub mod executor;
pub mod global_queue;
pub mod priority;
pub mod retry;
pub mod scheduler;
pub mod stats;

pub use driver::{DriverFailure, DriverRegistry, Import, InvokeOutcome, LanguageDriver};
pub use events::{BuildEvent, BuildEventSubscriber, FnSubscriber};
pub use executor::{DEFAULT_TIMEOUT_MS, ExecutionSummary, Executor, ExecutorError, ExecutorResult};
pub use priority::{Priority, PriorityTask};
pub use retry::{ErrorKind, RetryPolicy};
pub use scheduler::{DEFAULT_STEAL_ATTEMPTS, WorkStealingScheduler, WorkerHandle};
pub use stats::{SchedulerStats, WorkerStats};
