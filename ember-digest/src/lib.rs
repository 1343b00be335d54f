//! Deterministic content-addressed hashing for the Ember build core.
//!
//! This crate hashes bytes, files and ordered sequences of either to a
//! fixed-width [`Digest`]. It is the lowest layer of the core: every other
//! component (the sandbox codec, the two-tier cache, the build graph's
//! action/target keys) builds its keys out of [`Digest`] values produced
//! here.
//!
//! # Example
//!
//! ```
//! use ember_digest::ContentHasher;
//!
//! let a = ContentHasher::hash_bytes(b"hello");
//! let b = ContentHasher::hash_bytes(b"hello");
//! assert_eq!(a, b);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Size in bytes of a [`Digest`].
pub const DIGEST_LEN: usize = 32;

/// Streaming read buffer size used by [`ContentHasher::hash_file`].
const STREAM_BUF_LEN: usize = 64 * 1024;

/// A fixed-width 32-byte content hash (BLAKE3).
///
/// Two digests compare equal iff their bytes match. Digests are hex-encoded
/// for on-disk cache keys and wire transmission.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wrap raw bytes as a digest.
    #[must_use]
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Hex-encode the digest (lowercase, 64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a digest from a hex string.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::InvalidHex`] if the string is not exactly 64
    /// hex characters.
    pub fn from_hex(s: &str) -> Result<Self, DigestError> {
        if s.len() != DIGEST_LEN * 2 {
            return Err(DigestError::InvalidHex(s.to_string()));
        }
        let decoded = hex::decode(s).map_err(|_| DigestError::InvalidHex(s.to_string()))?;
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    /// The all-zero digest, used as a sentinel for "no content".
    #[must_use]
    pub fn zero() -> Self {
        Self([0u8; DIGEST_LEN])
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Errors produced while hashing.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// The file to hash does not exist or could not be opened.
    #[error("file not found: {0}")]
    FileMissing(String),

    /// An I/O failure occurred while streaming file content.
    #[error("I/O error hashing {path}: {source}")]
    Io {
        /// Path being hashed when the error occurred.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A hex string could not be decoded into a [`Digest`].
    #[error("invalid hex digest: {0}")]
    InvalidHex(String),
}

/// Result type for digest operations.
pub type DigestResult<T> = Result<T, DigestError>;

/// Stateless deterministic content hasher.
///
/// All methods are associated functions: the hasher carries no state between
/// calls, so it is trivially shareable across threads.
pub struct ContentHasher;

impl ContentHasher {
    /// Hash a byte slice directly.
    #[must_use]
    pub fn hash_bytes(buf: &[u8]) -> Digest {
        let hash = blake3::hash(buf);
        Digest(*hash.as_bytes())
    }

    /// Hash a file's contents in a bounded-memory streaming pass.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::FileMissing`] if the path cannot be opened and
    /// [`DigestError::Io`] on any other I/O failure while reading.
    pub fn hash_file(path: &Path) -> DigestResult<Digest> {
        let mut file = File::open(path).map_err(|_| DigestError::FileMissing(path.display().to_string()))?;
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; STREAM_BUF_LEN];
        loop {
            let n = file.read(&mut buf).map_err(|source| DigestError::Io {
                path: path.display().to_string(),
                source,
            })?;
            if n == 0 {
                break;
            }
            let _ = hasher.update(&buf[..n]);
        }
        Ok(Digest(*hasher.finalize().as_bytes()))
    }

    /// Hash an ordered sequence of byte buffers into a single digest.
    ///
    /// Each element is preceded by its length (as an 8-byte little-endian
    /// prefix) before being fed to the hasher, so that `hash_many(["a",
    /// "bc"])` cannot collide with `hash_many(["ab", "c"])`. The order of
    /// `items` is significant and preserved in the result: `hash_many` over a
    /// permutation of the same multiset generally differs.
    #[must_use]
    pub fn hash_many<I, T>(items: I) -> Digest
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let mut hasher = blake3::Hasher::new();
        for item in items {
            let bytes = item.as_ref();
            let _ = hasher.update(&(bytes.len() as u64).to_le_bytes());
            let _ = hasher.update(bytes);
        }
        Digest(*hasher.finalize().as_bytes())
    }

    /// Hash a directory tree deterministically by walking entries in sorted
    /// order and feeding `(relative_path, file_digest)` pairs to
    /// [`Self::hash_many`].
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::Io`] if the directory cannot be traversed, and
    /// [`DigestError::FileMissing`]/[`DigestError::Io`] if any entry cannot
    /// be hashed.
    pub fn hash_dir(path: &Path) -> DigestResult<Digest> {
        let mut entries = collect_files_sorted(path)?;
        entries.sort();
        let mut parts = Vec::with_capacity(entries.len() * 2);
        for rel in &entries {
            let full = path.join(rel);
            let file_digest = Self::hash_file(&full)?;
            parts.push(rel.clone().into_bytes());
            parts.push(file_digest.as_bytes().to_vec());
        }
        Ok(Self::hash_many(parts))
    }

    /// Hash many independent inputs concurrently, preserving the order of
    /// `items` in the returned vector. A simple fan-out: one OS thread per
    /// up-to-`parallelism` chunk, joined back in original order.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered, by input order.
    pub fn hash_files_parallel(paths: &[std::path::PathBuf], parallelism: usize) -> DigestResult<Vec<Digest>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let workers = parallelism.max(1).min(paths.len());
        let chunk_len = paths.len().div_ceil(workers);

        let mut results: Vec<Option<DigestResult<Digest>>> = (0..paths.len()).map(|_| None).collect();
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (chunk_idx, chunk) in paths.chunks(chunk_len).enumerate() {
                let base = chunk_idx * chunk_len;
                handles.push((base, scope.spawn(move || -> Vec<DigestResult<Digest>> {
                    chunk.iter().map(|p| Self::hash_file(p)).collect()
                })));
            }
            for (base, handle) in handles {
                let chunk_results = handle.join().unwrap_or_else(|_| {
                    vec![Err(DigestError::Io {
                        path: "<panicked worker>".to_string(),
                        source: io::Error::new(io::ErrorKind::Other, "hashing worker panicked"),
                    })]
                });
                for (offset, r) in chunk_results.into_iter().enumerate() {
                    results[base + offset] = Some(r);
                }
            }
        });

        results
            .into_iter()
            .map(|r| r.expect("every index is filled exactly once by its owning chunk"))
            .collect()
    }
}

fn collect_files_sorted(root: &Path) -> DigestResult<Vec<String>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let read_dir = std::fs::read_dir(&dir).map_err(|source| DigestError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        for entry in read_dir {
            let entry = entry.map_err(|source| DigestError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                out.push(rel);
            }
        }
    }
    Ok(out)
}
