//! Cache event notifications for subscribers (stats collectors, CLI progress
//! output, and the like).

use crate::key::{ActionKey, TargetKey};
use ember_digest::Digest;
use std::fmt;
use std::sync::Arc;

/// One observable occurrence in the cache's lifetime.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// A target-cache lookup found a usable entry.
    TargetHit {
        /// The key that hit.
        key: TargetKey,
    },
    /// A target-cache lookup found nothing.
    TargetMiss {
        /// The key that missed.
        key: TargetKey,
    },
    /// An action-cache lookup found a usable entry.
    ActionHit {
        /// The key that hit.
        key: ActionKey,
    },
    /// An action-cache lookup found nothing.
    ActionMiss {
        /// The key that missed.
        key: ActionKey,
    },
    /// A new entry was written to the local store.
    Insert {
        /// Hex-encoded key written.
        key: String,
        /// Size of the artifact written, in bytes.
        size_bytes: u64,
    },
    /// An entry was evicted from the local store to stay under budget.
    Evict {
        /// Hex-encoded key evicted.
        key: String,
    },
    /// A blob was uploaded to the remote cache.
    RemoteUpload {
        /// Digest of the uploaded blob.
        digest: Digest,
    },
    /// A blob was downloaded from the remote cache.
    RemoteDownload {
        /// Digest of the downloaded blob.
        digest: Digest,
    },
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::TargetHit { key } => write!(f, "target hit {key}"),
            CacheEvent::TargetMiss { key } => write!(f, "target miss {key}"),
            CacheEvent::ActionHit { key } => write!(f, "action hit {key}"),
            CacheEvent::ActionMiss { key } => write!(f, "action miss {key}"),
            CacheEvent::Insert { key, size_bytes } => write!(f, "insert {key} ({size_bytes} bytes)"),
            CacheEvent::Evict { key } => write!(f, "evict {key}"),
            CacheEvent::RemoteUpload { digest } => write!(f, "remote upload {digest}"),
            CacheEvent::RemoteDownload { digest } => write!(f, "remote download {digest}"),
        }
    }
}

/// A subscriber notified synchronously as cache events occur.
///
/// Subscribers are invoked from the thread that triggered the event, in the
/// order they were registered with the [`crate::coordinator::CacheCoordinator`]
/// that owns them; there is no ordering guarantee relative to events
/// published concurrently from other threads.
pub trait CacheEventSubscriber: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &CacheEvent);
}

/// A subscriber built from a closure, for tests and simple CLI wiring.
pub struct FnSubscriber<F: Fn(&CacheEvent) + Send + Sync>(F);

impl<F: Fn(&CacheEvent) + Send + Sync> FnSubscriber<F> {
    /// Wrap `f` as a subscriber.
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self(f))
    }
}

impl<F: Fn(&CacheEvent) + Send + Sync> CacheEventSubscriber for FnSubscriber<F> {
    fn on_event(&self, event: &CacheEvent) {
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
        let sub = FnSubscriber::new(move |_event: &CacheEvent| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        sub.on_event(&CacheEvent::Evict { key: "abc".to_string() });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
