//! velo: latency-sensitive data-access relay core
//!
//! One crate re-exporting the whole relay surface:
//!
//! * reactor and tasks ([`IoContext`], [`Task`])
//! * PostgreSQL and Redis wire clients with pools
//! * response cache with single-flight and tag invalidation
//! * batch scheduler with its online latency model
//! * the [`DbProvider`] facade tying them together
//!
//! ```no_run
//! use velo::{DbProvider, IoContext, PgValue, RelayConfig, Tag};
//!
//! fn main() -> velo::Result<()> {
//!     let io = IoContext::new()?;
//!     io.block_on(async {
//!         let provider = DbProvider::create(RelayConfig::from_env()?).await?;
//!         let row = provider
//!             .fetch_one(
//!                 "SELECT id, data FROM articles WHERE id = ANY($1)",
//!                 PgValue::Int8(42),
//!                 &[Tag::from("articles")],
//!             )
//!             .await?;
//!         println!("article 42: {} bytes", row.map_or(0, |b| b.len()));
//!         Ok(())
//!     })
//! }
//! ```

#![warn(rust_2018_idioms)]

pub use velo_core::{
    BatchExecutor, BatchRow, BatchScheduler, CacheConfig, DbProvider, EntityView, KeyFlags,
    QueryCacheKey, QueryParser, RelayConfig, ResponseCache, Tag, TimingEstimator,
};
pub use velo_error::{
    CacheError, ConfigError, ConnectionError, Error, PoolError, Result,
};
pub use velo_io::{Backoff, Interest, IoContext, IoHandle, Task, TimerId, WatchHandle};
pub use velo_pg::{ConnectionGuard, PgConfig, PgConnection, PgPool, PgResult, PgRow, PgValue};
pub use velo_redis::{RedisClient, RedisPool, RedisValue};
