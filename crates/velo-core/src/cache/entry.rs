//! Cache entries, ghosts, and tags.

use bytes::Bytes;

/// Short opaque byte string naming a data domain (`articles`, `user:42`).
/// Attached to entries at insertion; used to invalidate in bulk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(Bytes);

impl Tag {
    /// Tag from raw bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw tag bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// One cached artifact. Never mutated in place; replaced wholesale.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub(crate) artifact:         Bytes,
    pub(crate) tags:             Vec<Tag>,
    pub(crate) generation:       u64,
    pub(crate) access_count:     u32,
    /// Ghost pressure inherited at insertion, carried back into the ghost
    /// set if this entry is evicted again.
    pub(crate) prior_ghost_hits: u32,
}

impl CacheEntry {
    /// The cached artifact.
    #[must_use]
    pub fn artifact(&self) -> &Bytes {
        &self.artifact
    }

    /// Tags attached at insertion.
    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Insertion generation counter.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Accesses since insertion.
    #[must_use]
    pub fn access_count(&self) -> u32 {
        self.access_count
    }
}

/// Memory of an evicted fingerprint. Carries no data, only admission
/// pressure: its hit counter grows on every miss for the fingerprint, and
/// enough hits admit the re-produced entry straight to the protected
/// segment.
#[derive(Debug, Clone, Default)]
pub struct GhostEntry {
    pub(crate) hits: u32,
}

impl GhostEntry {
    /// Misses recorded against this ghost.
    #[must_use]
    pub fn hits(&self) -> u32 {
        self.hits
    }
}
