//! Response-cache errors.

/// Errors raised by the response cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The producer completed after one of its tags was invalidated.
    /// Attached waiters still receive the artifact; the cache is simply
    /// not populated.
    #[error("entry invalidated while its producer was running")]
    Invalidated,

    /// The producer task failed; every attached waiter receives this
    /// error independently.
    #[error("producer failed: {0}")]
    ProducerFailed(String),
}

impl CacheError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Invalidated => "cache_invalidated",
            Self::ProducerFailed(_) => "producer_failed",
        }
    }
}
