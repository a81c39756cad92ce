//! The batch scheduler: merge compatible pending lookups, flush on time.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use velo_error::{ConnectionError, Error, Result};
use velo_pg::PgValue;

use super::timing::TimingEstimator;
use crate::cache::ParamWriter;

/// Minimum hold before a flush; batching below this buys nothing.
const MIN_HOLD: Duration = Duration::from_micros(50);
/// No waiter is held longer than this before its batch dispatches.
const MAX_HOLD: Duration = Duration::from_millis(2);
/// Hold while the latency model is still bootstrapping, kept short to
/// collect samples faster.
const BOOTSTRAP_HOLD: Duration = Duration::from_micros(200);
/// A queue reaching this many lookups flushes immediately.
pub const MAX_BATCH: usize = 256;

/// One row of a multi-key fetch: the key it answers and the serialized
/// artifact for that key.
#[derive(Debug, Clone)]
pub struct BatchRow {
    /// Key value, as selected in the first result column.
    pub key:      PgValue,
    /// Serialized row artifact.
    pub artifact: Bytes,
}

/// Issues one multi-key fetch for a template. Implemented over the PG pool
/// in production; mockable in tests.
#[async_trait(?Send)]
pub trait BatchExecutor {
    /// Fetch all `keys` for `sql` in one round trip. `sql` is expected to
    /// select the key as its first column and to bind the ordered distinct
    /// key array as `$1`.
    async fn fetch_many(&self, sql: &'static str, keys: Vec<PgValue>) -> Result<Vec<BatchRow>>;
}

/// Counters exposed for logging and tests.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub lookups:             u64,
    pub batches:             u64,
    pub deadline_flushes:    u64,
    pub capacity_flushes:    u64,
    pub incompatible_flushes: u64,
}

struct PendingLookup {
    key:    PgValue,
    waiter: oneshot::Sender<Result<Option<Bytes>>>,
}

struct TemplateQueue {
    pending:      Vec<PendingLookup>,
    head_cost_ns: f64,
    head_arrival: Instant,
    timer:        Option<AbortHandle>,
}

struct SchedulerInner {
    queues: HashMap<&'static str, TemplateQueue>,
    stats:  SchedulerStats,
}

/// Coalesces point lookups per SQL template. Clones share the scheduler.
///
/// All methods must run on the owning reactor (flush timers and dispatches
/// are reactor-local tasks).
pub struct BatchScheduler<E: BatchExecutor + 'static> {
    inner:     Rc<RefCell<SchedulerInner>>,
    executor:  Rc<E>,
    estimator: Rc<RefCell<TimingEstimator>>,
}

impl<E: BatchExecutor + 'static> Clone for BatchScheduler<E> {
    fn clone(&self) -> Self {
        Self {
            inner:     Rc::clone(&self.inner),
            executor:  Rc::clone(&self.executor),
            estimator: Rc::clone(&self.estimator),
        }
    }
}

impl<E: BatchExecutor + 'static> BatchScheduler<E> {
    /// Scheduler over `executor`, timed by `estimator`.
    #[must_use]
    pub fn new(executor: E, estimator: Rc<RefCell<TimingEstimator>>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                queues: HashMap::new(),
                stats:  SchedulerStats::default(),
            })),
            executor: Rc::new(executor),
            estimator,
        }
    }

    /// Enqueue a point lookup and await its completion: the row artifact,
    /// or `None` if the key was absent from the fetched batch.
    ///
    /// Completed exactly once per caller; completion order within a batch
    /// is unspecified.
    pub async fn lookup(&self, sql: &'static str, key: PgValue) -> Result<Option<Bytes>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(sql, key, tx);
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Pending lookups currently queued for `sql`.
    #[must_use]
    pub fn queue_depth(&self, sql: &'static str) -> usize {
        self.inner.borrow().queues.get(sql).map_or(0, |q| q.pending.len())
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.inner.borrow().stats
    }

    fn enqueue(&self, sql: &'static str, key: PgValue, tx: oneshot::Sender<Result<Option<Bytes>>>) {
        let now = Instant::now();
        let lookup = PendingLookup { key, waiter: tx };

        let mut incompatible: Option<Vec<PendingLookup>> = None;
        let mut capacity_full = false;
        let mut needs_timer = false;
        let hold;
        {
            let mut inner = self.inner.borrow_mut();
            let est = self.estimator.borrow();
            let candidate_cost = est.get_request_time(sql);
            hold = flush_deadline(&est, sql);
            inner.stats.lookups += 1;

            match inner.queues.get_mut(sql) {
                Some(queue) => {
                    if !est.can_merge_pg(queue.head_cost_ns, candidate_cost) {
                        // Cost regimes diverged: dispatch the old batch now
                        // and let this lookup head a fresh queue.
                        if let Some(timer) = queue.timer.take() {
                            timer.abort();
                        }
                        incompatible = Some(std::mem::take(&mut queue.pending));
                        queue.pending.push(lookup);
                        queue.head_cost_ns = candidate_cost;
                        queue.head_arrival = now;
                        needs_timer = true;
                        inner.stats.incompatible_flushes += 1;
                    } else {
                        queue.pending.push(lookup);
                        if queue.pending.len() >= MAX_BATCH {
                            capacity_full = true;
                            inner.stats.capacity_flushes += 1;
                        }
                    }
                }
                None => {
                    inner.queues.insert(
                        sql,
                        TemplateQueue {
                            pending:      vec![lookup],
                            head_cost_ns: candidate_cost,
                            head_arrival: now,
                            timer:        None,
                        },
                    );
                    needs_timer = true;
                }
            }
        }

        if let Some(batch) = incompatible {
            self.spawn_batch(sql, batch);
        }
        if capacity_full {
            let batch = self.take_queue(sql);
            self.spawn_batch(sql, batch);
        }
        if needs_timer {
            let timer = self.schedule_flush(sql, hold);
            if let Some(queue) = self.inner.borrow_mut().queues.get_mut(sql) {
                queue.timer = Some(timer);
            }
        }
    }

    /// Detach the whole queue for `sql`, cancelling its timer.
    fn take_queue(&self, sql: &'static str) -> Vec<PendingLookup> {
        let mut inner = self.inner.borrow_mut();
        match inner.queues.remove(sql) {
            Some(queue) => {
                if let Some(timer) = queue.timer {
                    timer.abort();
                }
                tracing::trace!(
                    sql,
                    held_us = queue.head_arrival.elapsed().as_micros() as u64,
                    "queue detached"
                );
                queue.pending
            }
            None => Vec::new(),
        }
    }

    fn schedule_flush(&self, sql: &'static str, hold: Duration) -> AbortHandle {
        let scheduler = self.clone();
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(hold).await;
            // take_queue aborts this very task's handle; everything past
            // this point must stay synchronous, so the dispatch itself
            // runs as a separate task.
            let batch = scheduler.take_queue(sql);
            if !batch.is_empty() {
                scheduler.inner.borrow_mut().stats.deadline_flushes += 1;
                scheduler.spawn_batch(sql, batch);
            }
        });
        task.abort_handle()
    }

    fn spawn_batch(&self, sql: &'static str, batch: Vec<PendingLookup>) {
        let scheduler = self.clone();
        tokio::task::spawn_local(async move {
            scheduler.run_batch(sql, batch).await;
        });
    }

    /// Dispatch one batch: ordered distinct keys in, rows distributed back
    /// to waiters by key, `None` for keys the backend did not return.
    async fn run_batch(&self, sql: &'static str, pending: Vec<PendingLookup>) {
        if pending.is_empty() {
            return;
        }

        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        for lookup in &pending {
            if seen.insert(key_repr(&lookup.key)) {
                keys.push(lookup.key.clone());
            }
        }
        let n_keys = keys.len();
        tracing::debug!(sql, waiters = pending.len(), keys = n_keys, "batch dispatch");

        let started = Instant::now();
        let outcome = self.executor.fetch_many(sql, keys).await;
        let elapsed_ns = started.elapsed().as_nanos() as f64;

        match outcome {
            Ok(rows) => {
                {
                    let mut est = self.estimator.borrow_mut();
                    let sql_share = est.get_request_time(sql) * n_keys as f64;
                    est.update_pg_network_time(elapsed_ns, sql_share);
                    est.update_sql_timing_per_key(sql, n_keys, elapsed_ns);
                }
                self.inner.borrow_mut().stats.batches += 1;

                let by_key: HashMap<Vec<u8>, Bytes> =
                    rows.into_iter().map(|r| (key_repr(&r.key), r.artifact)).collect();
                for lookup in pending {
                    let hit = by_key.get(&key_repr(&lookup.key)).cloned();
                    let _ = lookup.waiter.send(Ok(hit));
                }
            }
            Err(e) => {
                tracing::warn!(sql, error = %e, "batch fetch failed");
                for lookup in pending {
                    let _ = lookup.waiter.send(Err(replicate(&e)));
                }
            }
        }
    }
}

/// Hold duration for a template's queue.
fn flush_deadline(est: &TimingEstimator, sql: &'static str) -> Duration {
    if est.is_pg_bootstrapping() || est.is_sql_bootstrapping(sql) {
        return BOOTSTRAP_HOLD;
    }
    Duration::from_nanos(est.get_request_time(sql) as u64).clamp(MIN_HOLD, MAX_HOLD)
}

/// Stable byte representation of a key, for dedup and row distribution.
fn key_repr(key: &PgValue) -> Vec<u8> {
    let mut writer = ParamWriter::new();
    writer.write_value(key);
    writer.finish().to_vec()
}

/// Errors are fanned out to every waiter; `Error` is not `Clone`, so each
/// waiter gets an equivalent error preserving the kind where it matters.
fn replicate(e: &Error) -> Error {
    match e {
        Error::Timeout => Error::Timeout,
        Error::Cancelled => Error::Cancelled,
        Error::Backend { code, message } => Error::Backend {
            code:    code.clone(),
            message: message.clone(),
        },
        other => ConnectionError::Lost(other.to_string()).into(),
    }
}
