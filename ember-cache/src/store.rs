//! Persistent on-disk key→value store shared by the target- and
//! action-cache granularities (§4.3, §6 on-disk layout).
//!
//! Layout under `root`:
//!
//! ```text
//! objects/<digest-first-2>/<digest-remainder>   -- artifact blobs
//! index.bin                                     -- packed records
//! ```
//!
//! `index.bin` is rewritten atomically (write temp, fsync, rename) on
//! [`Cache::flush`]/[`Cache::close`]; the record layout is the one named in
//! §6 (tag, key, mtime, size, output list) extended with the entry's output
//! digest and success flag so a read can detect a corrupted blob — see
//! `DESIGN.md`.

use crate::entry::CacheEntry;
use ember_digest::Digest;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Distinguishes the two cache granularities that share this on-disk layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Whole-target skip cache, keyed by `TargetKey`.
    Target,
    /// Per-action cache, keyed by `ActionKey`.
    Action,
}

impl Tag {
    fn as_byte(self) -> u8 {
        match self {
            Tag::Target => 0,
            Tag::Action => 1,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Tag::Target),
            1 => Some(Tag::Action),
            _ => None,
        }
    }
}

/// Errors raised by the on-disk cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An I/O operation against the store's root failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path the operation was performed against.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `index.bin` contained a record this reader could not parse.
    #[error("corrupted index at record {0}")]
    CorruptedIndex(usize),

    /// The bytes read back for an artifact do not hash to its recorded digest.
    #[error("digest mismatch reading artifact for key {key}: expected {expected}, found {found}")]
    DigestMismatch {
        /// The cache key whose artifact failed verification.
        key: String,
        /// The digest recorded in the index.
        expected: String,
        /// The digest actually computed from the bytes on disk.
        found: String,
    },
}

/// Result type for cache store operations.
pub type CacheResult<T> = Result<T, CacheError>;

fn io_err(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io { path: path.display().to_string(), source }
}

/// An artifact accompanying an [`CacheEntry`] on insert: either inline bytes
/// (stored in `objects/`) or a list of paths already materialized on disk
/// (the store records them without copying), or neither for a failure entry.
#[derive(Debug, Clone)]
pub enum Artifact {
    /// Inline bytes to be content-addressed and written under `objects/`.
    Bytes(Vec<u8>),
    /// Output paths already on disk; the store only records their locations.
    Paths(Vec<PathBuf>),
    /// No artifact — used for entries recording a failed action.
    None,
}

/// Aggregated statistics for one store.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of entries currently in the store.
    pub entries: usize,
    /// Total bytes of artifacts on disk (as tracked by the index).
    pub bytes: u64,
    /// Number of `lookup` calls that found an entry.
    pub hits: u64,
    /// Number of `lookup` calls that found nothing.
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate in `[0.0, 1.0]`; `0.0` when there have been no lookups.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// LRU order, least-recently-used at the front.
    order: VecDeque<String>,
    bytes: u64,
    hits: u64,
    misses: u64,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).expect("position just found");
            self.order.push_back(k);
        }
    }
}

/// A persistent, content-addressed key→value store on a local path.
///
/// Both the target- and action-cache granularities are this same type,
/// specialized only by [`Tag`] — the on-disk layout and eviction policy are
/// implemented once and shared.
pub struct Cache {
    tag: Tag,
    root: PathBuf,
    byte_budget: u64,
    inner: RwLock<Inner>,
    /// Keys with a build currently in flight; not evictable, and used to
    /// collapse duplicate work for the same key (§4.3 concurrency contract).
    pending: Mutex<HashSet<String>>,
}

impl Cache {
    /// Open (or create) a store rooted at `root` for the given granularity,
    /// loading any existing `index.bin`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if `root` cannot be created, or
    /// [`CacheError::CorruptedIndex`] if an existing index cannot be parsed.
    pub fn open(root: impl Into<PathBuf>, tag: Tag, byte_budget: u64) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        fs::create_dir_all(root.join("objects")).map_err(|e| io_err(&root, e))?;

        let (entries, bytes) = load_index(&root, tag)?;
        let order = entries.keys().cloned().collect();

        Ok(Self {
            tag,
            root,
            byte_budget,
            inner: RwLock::new(Inner { entries, order, bytes, hits: 0, misses: 0 }),
            pending: Mutex::new(HashSet::new()),
        })
    }

    /// Look up a key. Never triggers an artifact download — membership and
    /// metadata only.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.write();
        let found = inner.entries.get(key).cloned();
        if found.is_some() {
            inner.hits += 1;
            inner.touch(key);
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Read an artifact's bytes back from `objects/`, verifying its digest.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the blob is missing or unreadable, and
    /// [`CacheError::DigestMismatch`] if the bytes on disk do not hash to the
    /// entry's recorded `output_digest`.
    pub fn read_artifact(&self, key: &str) -> CacheResult<Vec<u8>> {
        let entry = self
            .inner
            .read()
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::CorruptedIndex(0))?;
        let path = self.object_path(&entry.output_digest);
        let bytes = fs::read(&path).map_err(|e| io_err(&path, e))?;
        let actual = ember_digest::ContentHasher::hash_bytes(&bytes);
        if actual != entry.output_digest {
            return Err(CacheError::DigestMismatch {
                key: key.to_string(),
                expected: entry.output_digest.to_hex(),
                found: actual.to_hex(),
            });
        }
        Ok(bytes)
    }

    /// Insert or atomically replace the entry for `key`. Concurrent inserts
    /// for the same key resolve to one winner; no partial state is ever
    /// visible to a concurrent [`Self::lookup`].
    ///
    /// Returns the keys evicted to stay under budget as a consequence of
    /// this insert, so the caller (the [`crate::coordinator::CacheCoordinator`])
    /// can publish a [`crate::events::CacheEvent::Evict`] for each.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the artifact cannot be written.
    pub fn insert(&self, key: &str, entry: CacheEntry, artifact: Artifact) -> CacheResult<Vec<String>> {
        if let Artifact::Bytes(bytes) = &artifact {
            self.write_object(&entry.output_digest, bytes)?;
        }

        let size = entry.size_bytes;
        {
            let mut inner = self.inner.write();
            let previous_size = inner.entries.get(key).map(|e| e.size_bytes).unwrap_or(0);
            let _ = inner.entries.insert(key.to_string(), entry);
            inner.touch(key);
            if !inner.order.contains(&key.to_string()) {
                inner.order.push_back(key.to_string());
            }
            inner.bytes = inner.bytes.saturating_sub(previous_size).saturating_add(size);
        }
        tracing::debug!(tag = ?self.tag, key, size, "cache insert");
        Ok(self.evict_over_budget())
    }

    /// Remove a single entry (its blob is left on disk; only a future GC
    /// pass, not modeled here, reclaims orphaned objects).
    pub fn evict(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.entries.remove(key) {
            inner.bytes = inner.bytes.saturating_sub(entry.size_bytes);
        }
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            let _ = inner.order.remove(pos);
        }
    }

    /// Remove every entry from the in-memory index. Objects on disk are
    /// dropped too, matching the teacher's `bazel clean --expunge` behavior.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the objects directory cannot be removed.
    pub fn clear(&self) -> CacheResult<()> {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.order.clear();
        inner.bytes = 0;
        let objects_dir = self.root.join("objects");
        if objects_dir.exists() {
            fs::remove_dir_all(&objects_dir).map_err(|e| io_err(&objects_dir, e))?;
        }
        fs::create_dir_all(&objects_dir).map_err(|e| io_err(&objects_dir, e))?;
        Ok(())
    }

    /// Try to become the sole builder for `key`. Returns `true` if this
    /// caller won the claim (no build for `key` was already in flight in
    /// this process), `false` if another caller already holds it.
    #[must_use]
    pub fn try_claim(&self, key: &str) -> bool {
        self.pending.lock().insert(key.to_string())
    }

    /// Release a claim previously won with [`Self::try_claim`].
    pub fn release_claim(&self, key: &str) {
        let _ = self.pending.lock().remove(key);
    }

    /// Current aggregated statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats { entries: inner.entries.len(), bytes: inner.bytes, hits: inner.hits, misses: inner.misses }
    }

    /// Synchronously persist the index: entries inserted before a successful
    /// `flush` survive a process crash.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the temp file cannot be written, synced
    /// or renamed into place.
    pub fn flush(&self) -> CacheResult<()> {
        let inner = self.inner.read();
        let tmp_path = self.root.join("index.bin.tmp");
        let mut tmp = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        for (key, entry) in &inner.entries {
            write_record(&mut tmp, self.tag, key, entry).map_err(|e| io_err(&tmp_path, e))?;
        }
        tmp.sync_all().map_err(|e| io_err(&tmp_path, e))?;
        drop(tmp);
        let index_path = self.root.join("index.bin");
        fs::rename(&tmp_path, &index_path).map_err(|e| io_err(&index_path, e))?;
        Ok(())
    }

    /// Flush and release in-process claims. A `Cache` may still be used
    /// after `close`; this models the teacher's explicit `close()` lifecycle
    /// call without preventing reuse in tests.
    ///
    /// # Errors
    ///
    /// See [`Self::flush`].
    pub fn close(&self) -> CacheResult<()> {
        self.flush()?;
        self.pending.lock().clear();
        Ok(())
    }

    fn object_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.root.join("objects").join(&hex[..2]).join(&hex[2..])
    }

    fn write_object(&self, digest: &Digest, bytes: &[u8]) -> CacheResult<()> {
        let path = self.object_path(digest);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes).map_err(|e| io_err(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    /// LRU eviction down to the high-water mark. Entries with a claim
    /// currently pending are skipped — "not evictable until the build
    /// completes" (§4.3). Returns the keys actually evicted.
    fn evict_over_budget(&self) -> Vec<String> {
        if self.byte_budget == 0 {
            return Vec::new();
        }
        let mut inner = self.inner.write();
        if inner.bytes <= self.byte_budget {
            return Vec::new();
        }
        let pending = self.pending.lock();
        let mut evicted = Vec::new();
        let mut i = 0;
        while inner.bytes > self.byte_budget && i < inner.order.len() {
            let key = inner.order[i].clone();
            if pending.contains(&key) {
                i += 1;
                continue;
            }
            let _ = inner.order.remove(i);
            if let Some(entry) = inner.entries.remove(&key) {
                inner.bytes = inner.bytes.saturating_sub(entry.size_bytes);
                tracing::debug!(tag = ?self.tag, key, "cache evict (over budget)");
                evicted.push(key);
            }
        }
        evicted
    }
}

fn write_record(out: &mut impl Write, tag: Tag, key: &str, entry: &CacheEntry) -> std::io::Result<()> {
    out.write_all(&[tag.as_byte()])?;
    let key_bytes = key.as_bytes();
    out.write_all(&(key_bytes.len() as u32).to_le_bytes())?;
    out.write_all(key_bytes)?;
    out.write_all(&entry.timestamp.to_le_bytes())?;
    out.write_all(&entry.size_bytes.to_le_bytes())?;
    out.write_all(&[u8::from(entry.success)])?;
    out.write_all(entry.output_digest.as_bytes())?;
    out.write_all(&(entry.output_paths.len() as u32).to_le_bytes())?;
    for p in &entry.output_paths {
        let s = p.to_string_lossy();
        out.write_all(&(s.len() as u32).to_le_bytes())?;
        out.write_all(s.as_bytes())?;
    }
    Ok(())
}

fn load_index(root: &Path, tag: Tag) -> CacheResult<(HashMap<String, CacheEntry>, u64)> {
    let index_path = root.join("index.bin");
    if !index_path.exists() {
        return Ok((HashMap::new(), 0));
    }
    let bytes = fs::read(&index_path).map_err(|e| io_err(&index_path, e))?;
    let mut cursor = 0usize;
    let mut entries = HashMap::new();
    let mut total_bytes = 0u64;
    let mut record_idx = 0usize;

    while cursor < bytes.len() {
        let start = cursor;
        let tag_byte = *bytes.get(cursor).ok_or(CacheError::CorruptedIndex(record_idx))?;
        cursor += 1;
        let record_tag = Tag::from_byte(tag_byte).ok_or(CacheError::CorruptedIndex(record_idx))?;

        let key_len = read_u32(&bytes, &mut cursor, record_idx)? as usize;
        let key = read_string(&bytes, &mut cursor, key_len, record_idx)?;

        let timestamp = read_u64(&bytes, &mut cursor, record_idx)?;
        let size_bytes = read_u64(&bytes, &mut cursor, record_idx)?;
        let success = *bytes.get(cursor).ok_or(CacheError::CorruptedIndex(record_idx))? != 0;
        cursor += 1;

        let digest_bytes: [u8; ember_digest::DIGEST_LEN] = bytes
            .get(cursor..cursor + ember_digest::DIGEST_LEN)
            .ok_or(CacheError::CorruptedIndex(record_idx))?
            .try_into()
            .map_err(|_| CacheError::CorruptedIndex(record_idx))?;
        cursor += ember_digest::DIGEST_LEN;
        let output_digest = Digest::from_bytes(digest_bytes);

        let output_count = read_u32(&bytes, &mut cursor, record_idx)? as usize;
        let mut output_paths = Vec::with_capacity(output_count.min(1 << 16));
        for _ in 0..output_count {
            let len = read_u32(&bytes, &mut cursor, record_idx)? as usize;
            let s = read_string(&bytes, &mut cursor, len, record_idx)?;
            output_paths.push(PathBuf::from(s));
        }

        if record_tag == tag {
            total_bytes += size_bytes;
            let _ = entries.insert(key, CacheEntry { output_digest, timestamp, size_bytes, success, output_paths });
        }
        debug_assert!(cursor > start);
        record_idx += 1;
    }

    Ok((entries, total_bytes))
}

fn read_u32(bytes: &[u8], cursor: &mut usize, record_idx: usize) -> CacheResult<u32> {
    let slice = bytes.get(*cursor..*cursor + 4).ok_or(CacheError::CorruptedIndex(record_idx))?;
    let arr: [u8; 4] = slice.try_into().map_err(|_| CacheError::CorruptedIndex(record_idx))?;
    *cursor += 4;
    Ok(u32::from_le_bytes(arr))
}

fn read_u64(bytes: &[u8], cursor: &mut usize, record_idx: usize) -> CacheResult<u64> {
    let slice = bytes.get(*cursor..*cursor + 8).ok_or(CacheError::CorruptedIndex(record_idx))?;
    let arr: [u8; 8] = slice.try_into().map_err(|_| CacheError::CorruptedIndex(record_idx))?;
    *cursor += 8;
    Ok(u64::from_le_bytes(arr))
}

fn read_string(bytes: &[u8], cursor: &mut usize, len: usize, record_idx: usize) -> CacheResult<String> {
    let slice = bytes.get(*cursor..*cursor + len).ok_or(CacheError::CorruptedIndex(record_idx))?;
    *cursor += len;
    String::from_utf8(slice.to_vec()).map_err(|_| CacheError::CorruptedIndex(record_idx))
}

/// Unix timestamp helper used by callers constructing a [`CacheEntry`].
#[must_use]
pub fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_digest::ContentHasher;

    fn entry_for(bytes: &[u8]) -> (String, CacheEntry, Artifact) {
        let digest = ContentHasher::hash_bytes(bytes);
        let key = digest.to_hex();
        let entry = CacheEntry::success(digest, now_unix(), bytes.len() as u64, Vec::new());
        (key, entry, Artifact::Bytes(bytes.to_vec()))
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path(), Tag::Action, 0).unwrap();
        let (key, entry, artifact) = entry_for(b"hello cache");
        assert!(cache.lookup(&key).is_none());
        let _ = cache.insert(&key, entry.clone(), artifact).unwrap();
        let found = cache.lookup(&key).unwrap();
        assert_eq!(found.output_digest, entry.output_digest);
        assert_eq!(cache.read_artifact(&key).unwrap(), b"hello cache");
    }

    #[test]
    fn flush_then_reopen_survives_a_simulated_crash() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = Cache::open(dir.path(), Tag::Target, 0).unwrap();
            let (key, entry, artifact) = entry_for(b"durable");
            let _ = cache.insert(&key, entry, artifact).unwrap();
            cache.flush().unwrap();
        }
        let reopened = Cache::open(dir.path(), Tag::Target, 0).unwrap();
        let (key, _, _) = entry_for(b"durable");
        assert!(reopened.lookup(&key).is_some());
    }

    #[test]
    fn eviction_fires_when_byte_budget_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path(), Tag::Action, 10).unwrap();
        let (k1, e1, a1) = entry_for(b"aaaaaaaaaa");
        let (k2, e2, a2) = entry_for(b"bbbbbbbbbb");
        assert!(cache.insert(&k1, e1, a1).unwrap().is_empty(), "first insert stays within budget");
        let evicted = cache.insert(&k2, e2, a2).unwrap();
        assert_eq!(evicted, vec![k1.clone()], "the least-recently-used key is reported evicted");
        assert!(cache.lookup(&k1).is_none());
    }

    #[test]
    fn pending_claim_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path(), Tag::Action, 0).unwrap();
        assert!(cache.try_claim("k"));
        assert!(!cache.try_claim("k"));
        cache.release_claim("k");
        assert!(cache.try_claim("k"));
    }

    #[test]
    fn claimed_entry_survives_eviction_pressure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path(), Tag::Action, 1).unwrap();
        let (key, entry, artifact) = entry_for(b"protected");
        assert!(cache.try_claim(&key));
        assert!(cache.insert(&key, entry, artifact).unwrap().is_empty(), "a claimed entry must never itself be reported evicted");
        assert!(cache.lookup(&key).is_some(), "an in-flight build's entry must not be evicted");
        cache.release_claim(&key);
    }

    #[test]
    fn clear_removes_all_entries_and_objects() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::open(dir.path(), Tag::Action, 0).unwrap();
        let (key, entry, artifact) = entry_for(b"to clear");
        let _ = cache.insert(&key, entry, artifact).unwrap();
        cache.clear().unwrap();
        assert!(cache.lookup(&key).is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}
