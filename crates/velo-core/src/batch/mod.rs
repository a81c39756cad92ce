//! Point-lookup coalescing.
//!
//! Concurrent single-row lookups against the same SQL template are held
//! briefly and dispatched as one multi-key fetch (`… WHERE key = ANY($1)`).
//! How long to hold is decided by an online latency model: the
//! [`TimingEstimator`] keeps exponential moving averages of per-backend
//! network time and per-template per-key cost, and the [`BatchScheduler`]
//! flushes each queue at `clamp(estimated_request_time, 50 µs, 2 ms)` —
//! tighter while the model is still bootstrapping.

mod scheduler;
mod timing;

pub use scheduler::{BatchExecutor, BatchRow, BatchScheduler, SchedulerStats, MAX_BATCH};
pub use timing::{TimingEstimator, BOOTSTRAP_THRESHOLD};
