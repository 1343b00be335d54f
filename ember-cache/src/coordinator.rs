//! [`CacheCoordinator`]: the single facade the scheduler talks to, unifying
//! the target cache, the action cache, and an optional remote tier.

use crate::entry::CacheEntry;
use crate::events::{CacheEvent, CacheEventSubscriber};
use crate::key::{ActionKey, TargetKey};
use crate::remote::RemoteCache;
use crate::store::{self, Artifact, Cache, CacheStats, Tag};
use ember_digest::Digest;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default tolerance for preferring a local entry over a remote one of
/// nearly the same age (§4.4's tie-break policy).
pub const DEFAULT_SKEW_THRESHOLD: Duration = Duration::from_secs(1);

/// Combined statistics across both cache tiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatorStats {
    /// Target-cache statistics.
    pub target: CacheStats,
    /// Action-cache statistics.
    pub action: CacheStats,
}

/// Facade over the target cache, the action cache, and an optional remote
/// tier. Owns event dispatch to registered subscribers.
pub struct CacheCoordinator {
    target_cache: Cache,
    action_cache: Cache,
    remote: Option<Arc<dyn RemoteCache>>,
    subscribers: Vec<Arc<dyn CacheEventSubscriber>>,
    skew_threshold: Duration,
}

impl CacheCoordinator {
    /// Open (or create) a coordinator rooted at `root`, with `target/` and
    /// `action/` subdirectories for the two tiers.
    ///
    /// # Errors
    ///
    /// Returns [`store::CacheError`] if either tier's directory cannot be opened.
    pub fn open(root: impl AsRef<Path>, byte_budget: u64) -> store::CacheResult<Self> {
        let root = root.as_ref();
        Ok(Self {
            target_cache: Cache::open(root.join("target"), Tag::Target, byte_budget)?,
            action_cache: Cache::open(root.join("action"), Tag::Action, byte_budget)?,
            remote: None,
            subscribers: Vec::new(),
            skew_threshold: DEFAULT_SKEW_THRESHOLD,
        })
    }

    /// Attach a remote cache tier used to replicate artifacts for
    /// distributed execution.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Register an event subscriber, called synchronously in registration
    /// order as events are published.
    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Arc<dyn CacheEventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Override the tie-break skew tolerance (default [`DEFAULT_SKEW_THRESHOLD`]).
    #[must_use]
    pub fn with_skew_threshold(mut self, skew: Duration) -> Self {
        self.skew_threshold = skew;
        self
    }

    /// Whole-target skip check: is there a usable cached result for this
    /// target given its current sources and dependency outputs?
    #[must_use]
    pub fn is_cached(&self, target_id: &str, source_digests: &[Digest], dep_output_digests: &[Digest]) -> Option<CacheEntry> {
        let key = TargetKey::new(target_id, source_digests, dep_output_digests);
        let found = self.target_cache.lookup(&key.to_hex());
        self.publish(if found.is_some() {
            CacheEvent::TargetHit { key }
        } else {
            CacheEvent::TargetMiss { key }
        });
        found
    }

    /// Record a target-level result, replacing any prior entry for the same key.
    ///
    /// # Errors
    ///
    /// Returns [`store::CacheError`] if the artifact cannot be written.
    pub fn update(
        &self,
        target_id: &str,
        source_digests: &[Digest],
        dep_output_digests: &[Digest],
        entry: CacheEntry,
        artifact: Artifact,
    ) -> store::CacheResult<()> {
        let key = TargetKey::new(target_id, source_digests, dep_output_digests);
        let size = entry.size_bytes;
        let digest = entry.output_digest;
        let evicted = self.target_cache.insert(&key.to_hex(), entry, artifact.clone())?;
        self.publish(CacheEvent::Insert { key: key.to_hex(), size_bytes: size });
        for evicted_key in evicted {
            self.publish(CacheEvent::Evict { key: evicted_key });
        }
        self.maybe_upload(digest, artifact);
        Ok(())
    }

    /// Per-action cache check.
    #[must_use]
    pub fn is_action_cached(
        &self,
        target_id: &str,
        input_digests: &[Digest],
        dep_output_digests: &[Digest],
        driver_metadata_digest: Digest,
        flags_digest: Digest,
    ) -> Option<CacheEntry> {
        let key = ActionKey::new(target_id, input_digests, dep_output_digests, driver_metadata_digest, flags_digest);
        let found = self.action_cache.lookup(&key.to_hex());
        self.publish(if found.is_some() {
            CacheEvent::ActionHit { key }
        } else {
            CacheEvent::ActionMiss { key }
        });
        found
    }

    /// Record a single action's result.
    ///
    /// # Errors
    ///
    /// Returns [`store::CacheError`] if the artifact cannot be written.
    #[allow(clippy::too_many_arguments)]
    pub fn record_action(
        &self,
        target_id: &str,
        input_digests: &[Digest],
        dep_output_digests: &[Digest],
        driver_metadata_digest: Digest,
        flags_digest: Digest,
        entry: CacheEntry,
        artifact: Artifact,
    ) -> store::CacheResult<()> {
        let key = ActionKey::new(target_id, input_digests, dep_output_digests, driver_metadata_digest, flags_digest);
        let size = entry.size_bytes;
        let digest = entry.output_digest;
        let evicted = self.action_cache.insert(&key.to_hex(), entry, artifact.clone())?;
        self.publish(CacheEvent::Insert { key: key.to_hex(), size_bytes: size });
        for evicted_key in evicted {
            self.publish(CacheEvent::Evict { key: evicted_key });
        }
        self.maybe_upload(digest, artifact);
        Ok(())
    }

    /// Try to become the sole builder for a target key; collapses duplicate
    /// concurrent builds of the same target onto one winner.
    #[must_use]
    pub fn try_claim_target(&self, target_id: &str, source_digests: &[Digest], dep_output_digests: &[Digest]) -> bool {
        let key = TargetKey::new(target_id, source_digests, dep_output_digests);
        self.target_cache.try_claim(&key.to_hex())
    }

    /// Release a claim taken with [`Self::try_claim_target`].
    pub fn release_target(&self, target_id: &str, source_digests: &[Digest], dep_output_digests: &[Digest]) {
        let key = TargetKey::new(target_id, source_digests, dep_output_digests);
        self.target_cache.release_claim(&key.to_hex());
    }

    /// Combined statistics across both tiers.
    #[must_use]
    pub fn get_stats(&self) -> CoordinatorStats {
        CoordinatorStats { target: self.target_cache.stats(), action: self.action_cache.stats() }
    }

    /// Persist both tiers' indexes.
    ///
    /// # Errors
    ///
    /// Returns [`store::CacheError`] if either tier's index cannot be written.
    pub fn flush(&self) -> store::CacheResult<()> {
        self.target_cache.flush()?;
        self.action_cache.flush()?;
        Ok(())
    }

    /// Flush and release all in-process claims. Call once at the end of a
    /// build.
    ///
    /// # Errors
    ///
    /// See [`Self::flush`].
    pub fn close(&self) -> store::CacheResult<()> {
        self.target_cache.close()?;
        self.action_cache.close()?;
        Ok(())
    }

    /// Drop every entry from both tiers. The remote tier, if configured, is
    /// untouched — clearing it is a separate, explicit operation.
    ///
    /// # Errors
    ///
    /// Returns [`store::CacheError`] if either tier's on-disk state cannot be cleared.
    pub fn clear(&self) -> store::CacheResult<()> {
        self.target_cache.clear()?;
        self.action_cache.clear()?;
        Ok(())
    }

    /// Fetch `digest`'s bytes, trying the local store first and falling
    /// back to the remote tier if configured. A value returned from remote
    /// is not written back into the local store here — the caller decides
    /// whether to materialize it as an artifact.
    ///
    /// # Errors
    ///
    /// Returns a [`store::CacheError`] only if found locally but unreadable;
    /// remote transport failures are folded into `Ok(None)` since a remote
    /// miss or outage should not fail a build that could still execute the
    /// action locally.
    pub fn fetch_remote(&self, digest: Digest) -> store::CacheResult<Option<Vec<u8>>> {
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        match remote.get(digest) {
            Ok(Some(bytes)) => {
                self.publish(CacheEvent::RemoteDownload { digest });
                Ok(Some(bytes))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                tracing::warn!(%err, "remote cache fetch failed, falling back to local execution");
                Ok(None)
            }
        }
    }

    /// Decide whether a remote candidate should replace a local one.
    ///
    /// Remote wins if there is no local entry, or if the remote entry is
    /// strictly newer than the local one by more than the configured skew
    /// threshold. Otherwise the local entry is kept, even if remote is
    /// slightly newer, to avoid thrashing on clock skew between machines.
    #[must_use]
    pub fn prefer_remote(&self, local: Option<&CacheEntry>, remote: Option<&CacheEntry>) -> bool {
        match (local, remote) {
            (None, Some(_)) => true,
            (None, None) | (Some(_), None) => false,
            (Some(local), Some(remote)) => {
                remote.timestamp > local.timestamp
                    && Duration::from_secs(remote.timestamp - local.timestamp) > self.skew_threshold
            }
        }
    }

    fn maybe_upload(&self, digest: Digest, artifact: Artifact) {
        let Some(remote) = &self.remote else { return };
        if let Artifact::Bytes(bytes) = artifact {
            match remote.put(digest, &bytes) {
                Ok(()) => self.publish(CacheEvent::RemoteUpload { digest }),
                Err(err) => tracing::warn!(%err, "remote cache upload failed"),
            }
        }
    }

    fn publish(&self, event: CacheEvent) {
        for subscriber in &self.subscribers {
            subscriber.on_event(&event);
        }
    }
}
