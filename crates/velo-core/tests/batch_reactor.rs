//! Batch scheduler behavior against a mock executor.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use velo_core::batch::{
    BatchExecutor, BatchRow, BatchScheduler, TimingEstimator, BOOTSTRAP_THRESHOLD, MAX_BATCH,
};
use velo_error::{Error, Result};
use velo_io::IoContext;
use velo_pg::PgValue;

static LOOKUP_SQL: &str = "SELECT id, data FROM items WHERE id = ANY($1)";

/// Records every dispatched key set; answers all keys except `missing`.
struct MockExecutor {
    calls:   Rc<RefCell<Vec<Vec<PgValue>>>>,
    missing: Option<i64>,
    fail:    bool,
    delay:   Duration,
}

impl MockExecutor {
    fn new(calls: Rc<RefCell<Vec<Vec<PgValue>>>>) -> Self {
        Self {
            calls,
            missing: None,
            fail: false,
            delay: Duration::from_micros(100),
        }
    }
}

fn artifact_for(key: &PgValue) -> Bytes {
    Bytes::from(format!("row:{key:?}"))
}

#[async_trait(?Send)]
impl BatchExecutor for MockExecutor {
    async fn fetch_many(&self, _sql: &'static str, keys: Vec<PgValue>) -> Result<Vec<BatchRow>> {
        self.calls.borrow_mut().push(keys.clone());
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(Error::Timeout);
        }
        Ok(keys
            .into_iter()
            .filter(|k| self.missing != as_i64(k))
            .map(|k| BatchRow {
                artifact: artifact_for(&k),
                key:      k,
            })
            .collect())
    }
}

fn as_i64(key: &PgValue) -> Option<i64> {
    match key {
        PgValue::Int8(v) => Some(*v),
        _ => None,
    }
}

fn seeded_estimator(per_key_ns: f64) -> Rc<RefCell<TimingEstimator>> {
    let mut est = TimingEstimator::new();
    for _ in 0..BOOTSTRAP_THRESHOLD {
        est.update_pg_network_time(0.0, 0.0);
        est.update_sql_timing_per_key(LOOKUP_SQL, 1, per_key_ns);
    }
    Rc::new(RefCell::new(est))
}

#[test]
fn concurrent_lookups_merge_into_one_batch() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let calls = Rc::new(RefCell::new(Vec::new()));
        // Steady state with a 300 µs estimate: hold is 300 µs.
        let scheduler =
            BatchScheduler::new(MockExecutor::new(Rc::clone(&calls)), seeded_estimator(300_000.0));

        // Three lookups land within the hold window and merge.
        let (a, b, c) = tokio::join!(
            scheduler.lookup(LOOKUP_SQL, PgValue::Int8(1)),
            scheduler.lookup(LOOKUP_SQL, PgValue::Int8(2)),
            scheduler.lookup(LOOKUP_SQL, PgValue::Int8(3)),
        );
        assert_eq!(a.expect("a").as_deref(), Some(&artifact_for(&PgValue::Int8(1))[..]));
        assert!(b.expect("b").is_some());
        assert!(c.expect("c").is_some());

        assert_eq!(calls.borrow().len(), 1, "one multi-key fetch for the whole window");
        assert_eq!(calls.borrow()[0].len(), 3);

        // A fourth lookup arriving after the flush starts a new batch.
        tokio::time::sleep(Duration::from_millis(1)).await;
        let d = scheduler.lookup(LOOKUP_SQL, PgValue::Int8(4)).await;
        assert!(d.expect("d").is_some());
        assert_eq!(calls.borrow().len(), 2);
        assert_eq!(calls.borrow()[1].len(), 1);
        assert_eq!(scheduler.stats().batches, 2);
    });
}

#[test]
fn duplicate_keys_dedupe_but_complete_every_waiter() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let scheduler =
            BatchScheduler::new(MockExecutor::new(Rc::clone(&calls)), seeded_estimator(300_000.0));

        let (a, b) = tokio::join!(
            scheduler.lookup(LOOKUP_SQL, PgValue::Int8(7)),
            scheduler.lookup(LOOKUP_SQL, PgValue::Int8(7)),
        );
        let a = a.expect("first waiter").expect("row");
        let b = b.expect("second waiter").expect("row");
        assert_eq!(a, b);

        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(calls.borrow()[0].len(), 1, "duplicate keys are fetched once");
    });
}

#[test]
fn missing_keys_complete_as_not_found() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut executor = MockExecutor::new(Rc::clone(&calls));
        executor.missing = Some(2);
        let scheduler = BatchScheduler::new(executor, seeded_estimator(300_000.0));

        let (a, b) = tokio::join!(
            scheduler.lookup(LOOKUP_SQL, PgValue::Int8(1)),
            scheduler.lookup(LOOKUP_SQL, PgValue::Int8(2)),
        );
        assert!(a.expect("present key").is_some());
        assert_eq!(b.expect("absent key"), None, "missing keys complete as not-found");
    });
}

#[test]
fn batch_failure_fans_out_to_every_waiter() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut executor = MockExecutor::new(Rc::clone(&calls));
        executor.fail = true;
        let scheduler = BatchScheduler::new(executor, seeded_estimator(300_000.0));

        let (a, b) = tokio::join!(
            scheduler.lookup(LOOKUP_SQL, PgValue::Int8(1)),
            scheduler.lookup(LOOKUP_SQL, PgValue::Int8(2)),
        );
        assert_eq!(a.expect_err("fan-out").error_code(), "timeout");
        assert_eq!(b.expect_err("fan-out").error_code(), "timeout");
        assert_eq!(calls.borrow().len(), 1);
    });
}

#[test]
fn full_queue_flushes_without_waiting_for_the_timer() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let scheduler =
            BatchScheduler::new(MockExecutor::new(Rc::clone(&calls)), seeded_estimator(300_000.0));

        let lookups: Vec<_> = (0..MAX_BATCH as i64)
            .map(|i| scheduler.lookup(LOOKUP_SQL, PgValue::Int8(i)))
            .collect();
        let results = futures::future::join_all(lookups).await;
        assert!(results.into_iter().all(|r| r.expect("row").is_some()));

        assert_eq!(scheduler.stats().capacity_flushes, 1);
        assert_eq!(calls.borrow()[0].len(), MAX_BATCH);
    });
}

#[test]
fn bootstrap_estimator_still_dispatches() {
    let io = IoContext::new().expect("reactor");
    io.block_on(async {
        let calls = Rc::new(RefCell::new(Vec::new()));
        // Fresh estimator: bootstrap hold applies, batches still flow.
        let scheduler = BatchScheduler::new(
            MockExecutor::new(Rc::clone(&calls)),
            Rc::new(RefCell::new(TimingEstimator::new())),
        );

        let row = scheduler.lookup(LOOKUP_SQL, PgValue::Int8(9)).await;
        assert!(row.expect("row").is_some());
        assert_eq!(calls.borrow().len(), 1);

        // Dispatches feed the model.
        assert!(scheduler.stats().batches >= 1);
    });
}
