//! Online latency model.
//!
//! Two scopes of exponential moving average (α = 0.1):
//!
//! * per-backend network round-trip time, bootstrapped by running average
//!   for the first [`BOOTSTRAP_THRESHOLD`] samples
//! * per-SQL-template per-key request time, with the backend network share
//!   subtracted before averaging
//!
//! Per-template state is keyed by the *content* of a `&'static str`
//! template. Templates are expected to be stable interned strings (string
//! literals from the mapping layer); two aliased literals with equal text
//! share one entry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Samples before an average leaves bootstrap.
pub const BOOTSTRAP_THRESHOLD: u32 = 16;

const ALPHA: f64 = 0.1;
const STALE_AFTER: Duration = Duration::from_secs(5);
const MERGE_FACTOR: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
struct SqlTiming {
    per_key_ns:  f64,
    samples:     u32,
    last_update: Instant,
}

/// Per-reactor latency estimator for both backends.
#[derive(Debug, Default)]
pub struct TimingEstimator {
    pg_network_time_ns:    f64,
    pg_bootstrap_count:    u32,
    pg_last_update:        Option<Instant>,
    redis_network_time_ns: f64,
    redis_bootstrap_count: u32,
    redis_last_update:     Option<Instant>,
    sql:                   HashMap<&'static str, SqlTiming>,
}

impl TimingEstimator {
    /// Fresh estimator: everything bootstrapping and stale.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one PostgreSQL round trip. `sample_ns` is the observed wall
    /// time, `sql_time_ns` the share attributed to query execution; the
    /// difference (clamped at zero) feeds the network-time average.
    pub fn update_pg_network_time(&mut self, sample_ns: f64, sql_time_ns: f64) {
        let network = (sample_ns - sql_time_ns).max(0.0);
        if self.pg_bootstrap_count < BOOTSTRAP_THRESHOLD {
            self.pg_bootstrap_count += 1;
            let count = f64::from(self.pg_bootstrap_count);
            self.pg_network_time_ns += (network - self.pg_network_time_ns) / count;
        } else {
            self.pg_network_time_ns =
                (1.0 - ALPHA) * self.pg_network_time_ns + ALPHA * network;
        }
        self.pg_last_update = Some(Instant::now());
    }

    /// Record one Redis round trip.
    pub fn update_redis_network_time(&mut self, sample_ns: f64) {
        if self.redis_bootstrap_count < BOOTSTRAP_THRESHOLD {
            self.redis_bootstrap_count += 1;
            let count = f64::from(self.redis_bootstrap_count);
            self.redis_network_time_ns += (sample_ns - self.redis_network_time_ns) / count;
        } else {
            self.redis_network_time_ns =
                (1.0 - ALPHA) * self.redis_network_time_ns + ALPHA * sample_ns;
        }
        self.redis_last_update = Some(Instant::now());
    }

    /// Record a dispatched fetch of `n_keys` keys that took `total_ns`.
    /// The per-key cost (network share removed) feeds the template's EMA.
    pub fn update_sql_timing_per_key(&mut self, sql: &'static str, n_keys: usize, total_ns: f64) {
        if n_keys == 0 {
            return;
        }
        let per_key = (total_ns - self.pg_network_time_ns).max(0.0) / n_keys as f64;
        let now = Instant::now();
        self.sql
            .entry(sql)
            .and_modify(|t| {
                t.per_key_ns = (1.0 - ALPHA) * t.per_key_ns + ALPHA * per_key;
                t.samples += 1;
                t.last_update = now;
            })
            .or_insert(SqlTiming {
                per_key_ns:  per_key,
                samples:     1,
                last_update: now,
            });
    }

    /// Current per-key estimate for a template, in nanoseconds. Zero for
    /// templates never sampled.
    #[must_use]
    pub fn get_request_time(&self, sql: &'static str) -> f64 {
        self.sql.get(sql).map_or(0.0, |t| t.per_key_ns)
    }

    /// Current PostgreSQL network-time estimate, in nanoseconds.
    #[must_use]
    pub fn pg_network_time_ns(&self) -> f64 {
        self.pg_network_time_ns
    }

    /// Current Redis network-time estimate, in nanoseconds.
    #[must_use]
    pub fn redis_network_time_ns(&self) -> f64 {
        self.redis_network_time_ns
    }

    /// PostgreSQL network samples recorded so far, capped at the
    /// bootstrap threshold.
    #[must_use]
    pub fn pg_bootstrap_count(&self) -> u32 {
        self.pg_bootstrap_count
    }

    /// Whether the PostgreSQL average is still warming up.
    #[must_use]
    pub fn is_pg_bootstrapping(&self) -> bool {
        self.pg_bootstrap_count < BOOTSTRAP_THRESHOLD
    }

    /// Whether the Redis average is still warming up.
    #[must_use]
    pub fn is_redis_bootstrapping(&self) -> bool {
        self.redis_bootstrap_count < BOOTSTRAP_THRESHOLD
    }

    /// Whether a template has fewer samples than the bootstrap threshold.
    #[must_use]
    pub fn is_sql_bootstrapping(&self, sql: &'static str) -> bool {
        self.sql.get(sql).map_or(true, |t| t.samples < BOOTSTRAP_THRESHOLD)
    }

    /// Whether a template's last sample is older than 5 s (or absent).
    #[must_use]
    pub fn is_sql_stale(&self, sql: &'static str) -> bool {
        self.sql.get(sql).map_or(true, |t| t.last_update.elapsed() > STALE_AFTER)
    }

    /// Whether the last PostgreSQL sample is older than 5 s (or absent).
    #[must_use]
    pub fn is_pg_stale(&self) -> bool {
        self.pg_last_update.map_or(true, |t| t.elapsed() > STALE_AFTER)
    }

    /// Whether the last Redis sample is older than 5 s (or absent).
    #[must_use]
    pub fn is_redis_stale(&self) -> bool {
        self.redis_last_update.map_or(true, |t| t.elapsed() > STALE_AFTER)
    }

    /// Whether two batches with these per-batch costs may merge: true when
    /// either side is unknown (zero), or when neither dominates the other
    /// by more than 5×. Merging across a bigger gap would let the slow
    /// batch eat the fast one's latency budget.
    #[must_use]
    pub fn can_merge_pg(&self, a_ns: f64, b_ns: f64) -> bool {
        if a_ns <= 0.0 || b_ns <= 0.0 {
            return true;
        }
        a_ns.max(b_ns) <= MERGE_FACTOR * a_ns.min(b_ns)
    }

    /// Drop all state back to bootstrap.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[cfg(test)]
    fn backdate_pg(&mut self, age: Duration) {
        self.pg_last_update = Instant::now().checked_sub(age);
    }
}
