//! Reconnect backoff policy.

use std::time::Duration;

use rand::Rng;

const INITIAL: Duration = Duration::from_millis(100);
const CAP: Duration = Duration::from_secs(5);
const JITTER: f64 = 0.2;

/// Exponential backoff starting at 100 ms, doubling up to a 5 s cap, with
/// ±20% jitter applied to every delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    /// Fresh policy at the initial delay.
    #[must_use]
    pub fn new() -> Self {
        Self { next: INITIAL }
    }

    /// The delay to sleep before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = (self.next * 2).min(CAP);
        let factor = 1.0 + rand::thread_rng().gen_range(-JITTER..=JITTER);
        base.mul_f64(factor)
    }

    /// Return to the initial delay after a successful attempt.
    pub fn reset(&mut self) {
        self.next = INITIAL;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
