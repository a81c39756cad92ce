//! Fingerprint → artifact response cache.
//!
//! # Overview
//!
//! A parsed request is reduced to a [`QueryCacheKey`] fingerprint; the
//! [`ResponseCache`] maps fingerprints to serialized artifacts with three
//! guarantees:
//!
//! * **Single-flight** — at most one producer runs per fingerprint;
//!   concurrent misses attach to the running producer and all resume with
//!   the same artifact (or each with the error).
//! * **Admission & eviction** — a byte-bounded segmented LRU. New entries
//!   enter *probation*; an access graduates them to *protected*. Eviction
//!   drains probation before touching protected. Evicted fingerprints
//!   leave a ghost whose hit counter biases re-admission: a fingerprint
//!   that keeps coming back is admitted straight to protected.
//! * **Tag invalidation** — entries carry opaque tags; invalidating a tag
//!   removes every entry carrying it in O(|tagged entries|) via a
//!   secondary index, and is serialized against producer completion: a
//!   producer whose tags were invalidated mid-flight hands its artifact to
//!   waiters but does not populate the cache.
//!
//! The cache is per-reactor. There is no cross-reactor coherence; a shared
//! cache means a single reactor that owns it.

mod entry;
mod key;
mod store;

pub use entry::{CacheEntry, GhostEntry, Tag};
pub use key::{KeyFlags, ParamWriter, QueryCacheKey, QueryParser};
pub use store::{CacheConfig, CacheStats, ResponseCache, Segment};
