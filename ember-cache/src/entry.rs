//! The record stored against a cache key.

use ember_digest::Digest;
use std::path::PathBuf;

/// A record associating a key with its result: output digest, when it was
/// written, its size, whether the action succeeded, and (optionally) the
/// set of output paths the action produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Digest of the primary output artifact.
    pub output_digest: Digest,
    /// Unix timestamp (seconds) the entry was written.
    pub timestamp: u64,
    /// Size of the stored artifact, in bytes.
    pub size_bytes: u64,
    /// Whether the action that produced this entry succeeded.
    pub success: bool,
    /// Output paths associated with this entry, relative to the workspace.
    pub output_paths: Vec<PathBuf>,
}

impl CacheEntry {
    /// Construct an entry for a successful action.
    #[must_use]
    pub fn success(output_digest: Digest, timestamp: u64, size_bytes: u64, output_paths: Vec<PathBuf>) -> Self {
        Self {
            output_digest,
            timestamp,
            size_bytes,
            success: true,
            output_paths,
        }
    }

    /// Construct an entry recording a failed action (cached so the failure
    /// itself can be replayed without re-running the driver).
    #[must_use]
    pub fn failure(timestamp: u64) -> Self {
        Self {
            output_digest: Digest::zero(),
            timestamp,
            size_bytes: 0,
            success: false,
            output_paths: Vec::new(),
        }
    }
}
