//! The facade: config → pools → estimator → scheduler → cache.
//!
//! `DbProvider` owns one of everything, per reactor. A point lookup flows
//! fingerprint → cache (single-flight) → batch scheduler → PostgreSQL
//! pool; Redis commands go straight through the client pool, feeding the
//! Redis network-time average on the way back.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

use velo_error::{ConnectionError, Error, Result};
use velo_pg::{PgConfig, PgPool, PgResult, PgRow, PgValue};
use velo_redis::{RedisPool, RedisValue};

use crate::batch::{BatchExecutor, BatchRow, BatchScheduler, TimingEstimator};
use crate::cache::{CacheConfig, KeyFlags, ParamWriter, QueryParser, ResponseCache, Tag};
use crate::config::RelayConfig;

/// Multi-key fetch executor over the PostgreSQL pool.
///
/// The SQL template must select the key as its first column and take the
/// key array as `$1` (the `… WHERE key = ANY($1)` shape).
pub struct PgBatchExecutor {
    pool: PgPool,
}

#[async_trait(?Send)]
impl BatchExecutor for PgBatchExecutor {
    async fn fetch_many(&self, sql: &'static str, keys: Vec<PgValue>) -> Result<Vec<BatchRow>> {
        let array = keys_to_array(keys)?;
        let mut guard = self.pool.acquire().await?;
        let result = guard.exec(sql, std::slice::from_ref(&array)).await?;
        if let Some(e) = result.error {
            return Err(Error::Backend {
                code:    e.code,
                message: e.message,
            });
        }

        let mut rows = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let Some(key) = row.get(0) else {
                return Err(ConnectionError::Protocol("batch row without key column".into())
                    .into());
            };
            rows.push(BatchRow {
                key:      key.clone(),
                artifact: encode_row(row),
            });
        }
        Ok(rows)
    }
}

/// Serialize one fetched row into its cacheable artifact.
fn encode_row(row: &PgRow) -> Bytes {
    let mut writer = ParamWriter::new();
    for value in row.values() {
        writer.write_value(value);
    }
    writer.finish()
}

/// Build the `$1` array parameter from the batch keys. All keys of one
/// template must share a type.
fn keys_to_array(keys: Vec<PgValue>) -> Result<PgValue> {
    let Some(first) = keys.first() else {
        return Err(Error::Backend {
            code:    "empty_batch".to_string(),
            message: "batch dispatched with no keys".to_string(),
        });
    };
    match first {
        PgValue::Int8(_) => {
            let mut items = Vec::with_capacity(keys.len());
            for key in keys {
                match key {
                    PgValue::Int8(v) => items.push(v),
                    other => return Err(mixed_key(&other)),
                }
            }
            Ok(PgValue::Int8Array(items))
        }
        PgValue::Int4(_) => {
            let mut items = Vec::with_capacity(keys.len());
            for key in keys {
                match key {
                    PgValue::Int4(v) => items.push(v),
                    other => return Err(mixed_key(&other)),
                }
            }
            Ok(PgValue::Int4Array(items))
        }
        PgValue::Text(_) => {
            let mut items = Vec::with_capacity(keys.len());
            for key in keys {
                match key {
                    PgValue::Text(v) => items.push(v),
                    other => return Err(mixed_key(&other)),
                }
            }
            Ok(PgValue::TextArray(items))
        }
        other => Err(Error::Backend {
            code:    "unsupported_key_type".to_string(),
            message: format!("point-lookup key type not batchable: {other:?}"),
        }),
    }
}

fn mixed_key(got: &PgValue) -> Error {
    Error::Backend {
        code:    "mixed_key_types".to_string(),
        message: format!("batch mixes key types, got {got:?}"),
    }
}

/// One relay instance: pools, latency model, scheduler and cache, all
/// owned by the reactor that created it.
pub struct DbProvider {
    pg:        PgPool,
    redis:     RedisPool,
    cache:     ResponseCache,
    scheduler: BatchScheduler<PgBatchExecutor>,
    estimator: Rc<RefCell<TimingEstimator>>,
}

impl DbProvider {
    /// Connect both pools and assemble the relay. Must run on the owning
    /// reactor.
    ///
    /// # Errors
    ///
    /// Fails if either pool cannot establish its initial connections.
    pub async fn create(config: RelayConfig) -> Result<DbProvider> {
        let pg_config = PgConfig::parse(&config.pg_conninfo())?;
        let pg = PgPool::create(pg_config, config.pg_pool_size).await?;
        let redis = RedisPool::create(
            &config.redis_host,
            config.redis_port,
            config.redis_password.as_deref(),
            config.redis_pool_size,
        )
        .await?;

        let estimator = Rc::new(RefCell::new(TimingEstimator::new()));
        let scheduler =
            BatchScheduler::new(PgBatchExecutor { pool: pg.clone() }, Rc::clone(&estimator));
        let cache = ResponseCache::new(CacheConfig::default());

        tracing::debug!("relay provider ready");
        Ok(DbProvider {
            pg,
            redis,
            cache,
            scheduler,
            estimator,
        })
    }

    /// Cached point lookup.
    ///
    /// Hits come straight from the cache. Misses ride the batch scheduler:
    /// concurrent lookups on the same template coalesce into one
    /// `= ANY($1)` fetch, and concurrent lookups of the same key share one
    /// producer. `Ok(None)` means the backend has no row for this key
    /// (never cached).
    pub async fn fetch_one(
        &self,
        sql: &'static str,
        key: PgValue,
        tags: &[Tag],
    ) -> Result<Option<Bytes>> {
        let fingerprint =
            QueryParser::fingerprint(sql, std::slice::from_ref(&key), KeyFlags::POINT_LOOKUP);
        let scheduler = self.scheduler.clone();
        self.cache
            .get_or_produce(fingerprint, tags.to_vec(), async move {
                scheduler.lookup(sql, key).await
            })
            .await
    }

    /// Run one SQL statement on a leased connection, uncached.
    pub async fn exec_sql(&self, sql: &str, params: &[PgValue]) -> Result<PgResult> {
        let mut guard = self.pg.acquire().await?;
        guard.exec(sql, params).await
    }

    /// Run one Redis command, feeding the Redis network-time average.
    pub async fn exec_redis(&self, args: &[impl AsRef<[u8]>]) -> Result<RedisValue> {
        let started = Instant::now();
        let client = self.redis.next();
        let reply = client.exec(args).await?;
        self.estimator
            .borrow_mut()
            .update_redis_network_time(started.elapsed().as_nanos() as f64);
        Ok(reply)
    }

    /// Invalidate every cached entry carrying `tag`. Returns the number of
    /// entries removed.
    pub fn invalidate_tag(&self, tag: &Tag) -> usize {
        self.cache.invalidate_tag(tag)
    }

    /// Shut down both pools: queued PostgreSQL acquirers fail with
    /// `PoolError::Closed` and dead Redis clients are no longer replaced.
    /// In-flight operations run to completion. Idempotent.
    pub fn close(&self) {
        self.pg.close();
        self.redis.close();
    }

    /// The response cache.
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// The PostgreSQL pool.
    #[must_use]
    pub fn pg_pool(&self) -> &PgPool {
        &self.pg
    }

    /// The Redis pool.
    #[must_use]
    pub fn redis_pool(&self) -> &RedisPool {
        &self.redis
    }

    /// The latency model shared by the scheduler.
    #[must_use]
    pub fn estimator(&self) -> &Rc<RefCell<TimingEstimator>> {
        &self.estimator
    }
}
