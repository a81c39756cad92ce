//! velo-core: the relay core
//!
//! Ties the wire clients together into a latency-oriented data-access
//! relay:
//!
//! * [`cache`] — fingerprint → artifact response cache with single-flight
//!   production, segmented-LRU admission with ghost tracking, and
//!   tag-based invalidation
//! * [`batch`] — coalesces concurrent point lookups into multi-key
//!   fetches, timed by an online latency model
//! * [`wrapper`] — entity views with lazily-materialized shared buffers
//! * [`config`] — environment configuration
//! * [`provider`] — the facade wiring config → pools → scheduler → cache
//!
//! Everything in this crate is per-reactor state: no type here is `Send`,
//! and a process running several reactors runs several independent caches.

#![warn(rust_2018_idioms)]

pub mod batch;
pub mod cache;
pub mod config;
pub mod provider;
pub mod wrapper;

pub use batch::{BatchExecutor, BatchRow, BatchScheduler, TimingEstimator};
pub use cache::{CacheConfig, KeyFlags, QueryCacheKey, QueryParser, ResponseCache, Tag};
pub use config::RelayConfig;
pub use provider::DbProvider;
pub use wrapper::EntityView;
