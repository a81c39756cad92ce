//! The response cache proper: segmented LRU, ghosts, tags, single-flight.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::num::NonZeroUsize;
use std::rc::Rc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::oneshot;

use velo_error::{CacheError, Result};

use super::entry::{CacheEntry, GhostEntry, Tag};
use super::key::QueryCacheKey;

/// Cache sizing knobs.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Total artifact-byte budget across both segments.
    pub capacity_bytes:      usize,
    /// Maximum remembered ghosts (LRU over ghosts).
    pub ghost_capacity:      usize,
    /// Ghost hits required to admit a re-produced entry straight into the
    /// protected segment.
    pub promotion_threshold: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes:      64 * 1024 * 1024,
            ghost_capacity:      4096,
            promotion_threshold: 2,
        }
    }
}

/// Counters exposed for logging and tests.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits:                 u64,
    pub misses:               u64,
    pub evictions:            u64,
    pub invalidated_entries:  u64,
    pub single_flight_joins:  u64,
    pub ghost_promotions:     u64,
    pub producers_suppressed: u64,
}

/// Which segment an entry currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// First-insertion segment, evicted first.
    Probation,
    /// Segment for entries that proved themselves by being accessed.
    Protected,
}

struct Flight {
    waiters: Vec<oneshot::Sender<Result<Option<Bytes>>>>,
    epoch:   u64,
    tags:    Vec<Tag>,
}

struct CacheInner {
    probation:  LruCache<QueryCacheKey, CacheEntry>,
    protected:  LruCache<QueryCacheKey, CacheEntry>,
    ghosts:     LruCache<QueryCacheKey, GhostEntry>,
    tags:       HashMap<Tag, HashSet<QueryCacheKey>>,
    flights:    HashMap<QueryCacheKey, Flight>,
    tag_epochs: HashMap<Tag, u64>,
    epoch:      u64,
    generation: u64,
    bytes_used: usize,
    config:     CacheConfig,
    stats:      CacheStats,
}

/// Per-reactor response cache. Clones share the same cache.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Rc<RefCell<CacheInner>>,
}

impl ResponseCache {
    /// Empty cache with the given sizing.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let ghost_capacity =
            NonZeroUsize::new(config.ghost_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Rc::new(RefCell::new(CacheInner {
                probation: LruCache::unbounded(),
                protected: LruCache::unbounded(),
                ghosts: LruCache::new(ghost_capacity),
                tags: HashMap::new(),
                flights: HashMap::new(),
                tag_epochs: HashMap::new(),
                epoch: 0,
                generation: 0,
                bytes_used: 0,
                config,
                stats: CacheStats::default(),
            })),
        }
    }

    /// Look up an artifact, touching recency and the access counter.
    ///
    /// A miss that matches a ghost bumps the ghost's hit counter.
    #[must_use]
    pub fn get(&self, key: &QueryCacheKey) -> Option<Bytes> {
        let mut inner = self.inner.borrow_mut();
        match inner.lookup(key) {
            Some(artifact) => Some(artifact),
            None => {
                inner.note_miss(key);
                None
            }
        }
    }

    /// Artifact lookup with at-most-one producer per fingerprint.
    ///
    /// * hit → the cached artifact, immediately
    /// * miss with a producer already in flight → attach to it; every
    ///   attached waiter resumes with the same outcome. Ghost-wise the
    ///   whole flight is a single miss: only the caller that opened it
    ///   bumps a matching ghost's hit counter
    /// * fresh miss → spawn exactly one producer; on success the entry is
    ///   inserted (unless its tags were invalidated mid-flight) and all
    ///   waiters resume with the artifact
    ///
    /// A producer yielding `Ok(None)` (backend not-found) completes the
    /// waiters without populating the cache. A failed producer hands each
    /// waiter the error independently; the ghost record is untouched. A
    /// waiter that is dropped simply detaches: the producer always runs to
    /// completion and may populate the cache.
    ///
    /// Must be called from reactor context (the producer is spawned as a
    /// reactor-local task).
    pub async fn get_or_produce<F>(
        &self,
        key: QueryCacheKey,
        tags: Vec<Tag>,
        producer: F,
    ) -> Result<Option<Bytes>>
    where
        F: Future<Output = Result<Option<Bytes>>> + 'static,
    {
        enum Action {
            Hit(Bytes),
            Wait(oneshot::Receiver<Result<Option<Bytes>>>),
            Produce(oneshot::Receiver<Result<Option<Bytes>>>),
        }

        let action = {
            let mut inner = self.inner.borrow_mut();
            if let Some(artifact) = inner.lookup(&key) {
                Action::Hit(artifact)
            } else {
                let (tx, rx) = oneshot::channel();
                if let Some(flight) = inner.flights.get_mut(&key) {
                    // Joiners share the one production already in flight:
                    // a miss for the stats, but not extra admission
                    // pressure on the ghost.
                    flight.waiters.push(tx);
                    inner.stats.misses += 1;
                    inner.stats.single_flight_joins += 1;
                    Action::Wait(rx)
                } else {
                    inner.note_miss(&key);
                    let epoch = inner.epoch;
                    inner.flights.insert(
                        key.clone(),
                        Flight {
                            waiters: vec![tx],
                            epoch,
                            tags: tags.clone(),
                        },
                    );
                    Action::Produce(rx)
                }
            }
        };

        let rx = match action {
            Action::Hit(artifact) => return Ok(Some(artifact)),
            Action::Wait(rx) => rx,
            Action::Produce(rx) => {
                let cache = self.clone();
                let flight_key = key.clone();
                tokio::task::spawn_local(async move {
                    let outcome = producer.await;
                    cache.finish_flight(&flight_key, outcome);
                });
                rx
            }
        };

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CacheError::ProducerFailed("producer dropped".into()).into()),
        }
    }

    /// Remove every entry carrying `tag`; each leaves a ghost. Returns the
    /// number of entries removed.
    ///
    /// Also fences in-flight producers: any producer carrying `tag` that
    /// completes after this call will not populate the cache.
    pub fn invalidate_tag(&self, tag: &Tag) -> usize {
        let mut inner = self.inner.borrow_mut();
        inner.epoch += 1;
        let epoch = inner.epoch;
        inner.tag_epochs.insert(tag.clone(), epoch);

        let keys: Vec<QueryCacheKey> =
            inner.tags.remove(tag).map(|set| set.into_iter().collect()).unwrap_or_default();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = inner.remove_entry(&key) {
                let hits = entry.prior_ghost_hits;
                inner.ghosts.push(key, GhostEntry { hits });
                removed += 1;
            }
        }
        inner.stats.invalidated_entries += removed as u64;
        tracing::debug!(tag = %tag, removed, "tag invalidated");
        removed
    }

    /// Number of live entries across both segments.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.borrow();
        inner.probation.len() + inner.protected.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Artifact bytes currently held.
    #[must_use]
    pub fn bytes_used(&self) -> usize {
        self.inner.borrow().bytes_used
    }

    /// Which segment holds `key`, if any. Does not touch recency.
    #[must_use]
    pub fn segment(&self, key: &QueryCacheKey) -> Option<Segment> {
        let inner = self.inner.borrow();
        if inner.protected.contains(key) {
            Some(Segment::Protected)
        } else if inner.probation.contains(key) {
            Some(Segment::Probation)
        } else {
            None
        }
    }

    /// Ghost hit counter for `key`, if a ghost exists. Does not touch
    /// recency.
    #[must_use]
    pub fn ghost_hits(&self, key: &QueryCacheKey) -> Option<u32> {
        self.inner.borrow().ghosts.peek(key).map(GhostEntry::hits)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.borrow().stats
    }

    /// Producer completion: insert (unless fenced), then resume waiters.
    fn finish_flight(&self, key: &QueryCacheKey, outcome: Result<Option<Bytes>>) {
        let mut inner = self.inner.borrow_mut();
        let Some(flight) = inner.flights.remove(key) else {
            return;
        };

        match outcome {
            Ok(Some(artifact)) => {
                let fenced = flight.tags.iter().any(|t| {
                    inner.tag_epochs.get(t).copied().unwrap_or(0) > flight.epoch
                });
                if fenced {
                    inner.stats.producers_suppressed += 1;
                    tracing::debug!(
                        code = CacheError::Invalidated.error_code(),
                        template = key.template(),
                        "producer finished after tag invalidation, not cached"
                    );
                } else {
                    inner.insert(key.clone(), artifact.clone(), flight.tags.clone());
                }
                for waiter in flight.waiters {
                    let _ = waiter.send(Ok(Some(artifact.clone())));
                }
            }
            Ok(None) => {
                for waiter in flight.waiters {
                    let _ = waiter.send(Ok(None));
                }
            }
            Err(e) => {
                let message = e.to_string();
                for waiter in flight.waiters {
                    let _ = waiter
                        .send(Err(CacheError::ProducerFailed(message.clone()).into()));
                }
            }
        }
    }
}

impl CacheInner {
    fn lookup(&mut self, key: &QueryCacheKey) -> Option<Bytes> {
        if let Some(entry) = self.protected.get_mut(key) {
            entry.access_count += 1;
            self.stats.hits += 1;
            return Some(entry.artifact.clone());
        }
        // Access graduates a probation entry to protected.
        if let Some(mut entry) = self.probation.pop(key) {
            entry.access_count += 1;
            self.stats.hits += 1;
            let artifact = entry.artifact.clone();
            self.protected.push(key.clone(), entry);
            return Some(artifact);
        }
        None
    }

    fn note_miss(&mut self, key: &QueryCacheKey) {
        self.stats.misses += 1;
        if let Some(ghost) = self.ghosts.get_mut(key) {
            ghost.hits += 1;
        }
    }

    fn insert(&mut self, key: QueryCacheKey, artifact: Bytes, tags: Vec<Tag>) {
        let size = artifact.len();
        if size > self.config.capacity_bytes {
            tracing::warn!(size, "artifact exceeds cache capacity, not cached");
            return;
        }
        // Replacing an existing entry must not double-count its bytes.
        if let Some(old) = self.remove_entry(&key) {
            tracing::debug!(generation = old.generation, "replaced live entry");
        }
        while self.bytes_used + size > self.config.capacity_bytes {
            if !self.evict_one() {
                break;
            }
        }

        self.generation += 1;
        let prior_ghost_hits = self.ghosts.pop(&key).map(|g| g.hits).unwrap_or(0);
        let entry = CacheEntry {
            artifact,
            tags: tags.clone(),
            generation: self.generation,
            access_count: 0,
            prior_ghost_hits,
        };
        for tag in &tags {
            self.tags.entry(tag.clone()).or_default().insert(key.clone());
        }
        self.bytes_used += size;

        if prior_ghost_hits >= self.config.promotion_threshold {
            self.stats.ghost_promotions += 1;
            self.protected.push(key, entry);
        } else {
            self.probation.push(key, entry);
        }
    }

    /// Evict one victim: probation tail first, protected tail otherwise.
    /// The victim leaves a ghost carrying its accumulated pressure.
    fn evict_one(&mut self) -> bool {
        let victim = self.probation.pop_lru().or_else(|| self.protected.pop_lru());
        let Some((key, entry)) = victim else {
            return false;
        };
        self.bytes_used -= entry.artifact.len();
        self.detach_tags(&key, &entry);
        self.stats.evictions += 1;
        let hits = entry.prior_ghost_hits;
        self.ghosts.push(key, GhostEntry { hits });
        true
    }

    fn remove_entry(&mut self, key: &QueryCacheKey) -> Option<CacheEntry> {
        let entry = self.probation.pop(key).or_else(|| self.protected.pop(key))?;
        self.bytes_used -= entry.artifact.len();
        self.detach_tags(key, &entry);
        Some(entry)
    }

    fn detach_tags(&mut self, key: &QueryCacheKey, entry: &CacheEntry) {
        for tag in &entry.tags {
            let emptied = match self.tags.get_mut(tag) {
                Some(set) => {
                    set.remove(key);
                    set.is_empty()
                }
                None => false,
            };
            if emptied {
                self.tags.remove(tag);
            }
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ResponseCache")
            .field("entries", &(inner.probation.len() + inner.protected.len()))
            .field("bytes_used", &inner.bytes_used)
            .field("ghosts", &inner.ghosts.len())
            .field("flights", &inner.flights.len())
            .finish()
    }
}
