//! Typed build-lifecycle events the executor publishes (§6's "Event
//! interface (produced)"). Distinct from [`ember_cache::CacheEvent`]:
//! these describe a node's journey through the graph, not cache-tier
//! hits/misses. Subscribers run synchronously, in registration order, on
//! the publishing thread — the same contract `ember_cache` uses.

use ember_graph::NodeId;
use std::sync::Arc;
use std::time::Duration;

/// One observable occurrence in a build's lifetime.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    /// A node began executing (cache lookup or driver invocation starting).
    TargetStarted {
        /// The node that started.
        node: NodeId,
    },
    /// A node's driver ran to completion successfully.
    TargetCompleted {
        /// The node that completed.
        node: NodeId,
        /// Wall-clock duration of the driver invocation.
        duration: Duration,
    },
    /// A node failed.
    TargetFailed {
        /// The node that failed.
        node: NodeId,
        /// A rendered description of the failure.
        error: String,
    },
    /// A node was satisfied by a cache hit without invoking a driver.
    TargetCached {
        /// The node satisfied from cache.
        node: NodeId,
    },
    /// A node was skipped (typically via `cancel_descendants`).
    TargetSkipped {
        /// The node that was skipped.
        node: NodeId,
    },
    /// Incremental progress within a still-running node, for renderers that
    /// want a heartbeat rather than only start/end notifications.
    TargetProgress {
        /// The node in progress.
        node: NodeId,
        /// A short, driver-specific progress message.
        message: String,
    },
}

/// A subscriber notified synchronously as build events occur.
pub trait BuildEventSubscriber: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &BuildEvent);
}

/// A subscriber built from a closure, for tests and simple CLI wiring.
pub struct FnSubscriber<F: Fn(&BuildEvent) + Send + Sync>(F);

impl<F: Fn(&BuildEvent) + Send + Sync> FnSubscriber<F> {
    /// Wrap `f` as a subscriber.
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self(f))
    }
}

impl<F: Fn(&BuildEvent) + Send + Sync> BuildEventSubscriber for FnSubscriber<F> {
    fn on_event(&self, event: &BuildEvent) {
        (self.0)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fn_subscriber_is_invoked() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::clone(&count);
        let sub = FnSubscriber::new(move |_event: &BuildEvent| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        sub.on_event(&BuildEvent::TargetCached { node: NodeId::new("//a:x") });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
