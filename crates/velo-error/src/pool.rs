//! Connection-pool errors.

/// Errors raised by connection pools.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Bounded acquisition (`acquire_timeout`) gave up after its max-wait.
    /// Plain `acquire` blocks instead of returning this.
    #[error("pool exhausted")]
    Exhausted,

    /// The pool was closed: queued waiters are failed and no further
    /// leases are handed out.
    #[error("pool closed")]
    Closed,
}

impl PoolError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Exhausted => "pool_exhausted",
            Self::Closed => "pool_closed",
        }
    }
}
