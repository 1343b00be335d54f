//! Digest-derived keys for the two cache granularities.

use ember_digest::{ContentHasher, Digest};

/// Key into the [`crate::store::ActionCache`][action-cache]: a digest over
/// the target id, ordered input digests, ordered dependency output digests,
/// a language-driver metadata digest, and a flags digest.
///
/// [action-cache]: crate::store::Cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionKey(Digest);

impl ActionKey {
    /// Compose an `ActionKey` from its constituent digests.
    #[must_use]
    pub fn new(
        target_id: &str,
        input_digests: &[Digest],
        dep_output_digests: &[Digest],
        driver_metadata_digest: Digest,
        flags_digest: Digest,
    ) -> Self {
        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(3 + input_digests.len() + dep_output_digests.len());
        parts.push(target_id.as_bytes().to_vec());
        for d in input_digests {
            parts.push(d.as_bytes().to_vec());
        }
        for d in dep_output_digests {
            parts.push(d.as_bytes().to_vec());
        }
        parts.push(driver_metadata_digest.as_bytes().to_vec());
        parts.push(flags_digest.as_bytes().to_vec());
        Self(ContentHasher::hash_many(parts))
    }

    /// The underlying digest.
    #[must_use]
    pub fn digest(&self) -> Digest {
        self.0
    }

    /// Hex encoding, used as the on-disk and wire key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key into the [`crate::store::TargetCache`][target-cache]: a coarser
/// digest over the target id, ordered source content digests, and ordered
/// dependency output digests. Used for whole-target skip decisions.
///
/// [target-cache]: crate::store::Cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey(Digest);

impl TargetKey {
    /// Compose a `TargetKey` from its constituent digests.
    #[must_use]
    pub fn new(target_id: &str, source_digests: &[Digest], dep_output_digests: &[Digest]) -> Self {
        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(1 + source_digests.len() + dep_output_digests.len());
        parts.push(target_id.as_bytes().to_vec());
        for d in source_digests {
            parts.push(d.as_bytes().to_vec());
        }
        for d in dep_output_digests {
            parts.push(d.as_bytes().to_vec());
        }
        Self(ContentHasher::hash_many(parts))
    }

    /// The underlying digest.
    #[must_use]
    pub fn digest(&self) -> Digest {
        self.0
    }

    /// Hex encoding, used as the on-disk and wire key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
