//! Unified error types for velo runtime crates.
//!
//! All runtime crates depend on this crate for error handling.

// Error variants and fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

mod cache;
mod config;
mod connection;
mod pool;

pub use cache::CacheError;
pub use config::ConfigError;
pub use connection::ConnectionError;
pub use pool::PoolError;

/// Unified error type wrapping all domain errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Application-level backend failure on an operation with no result
    /// payload to carry it (e.g. preparing a statement). The connection
    /// remains usable.
    #[error("backend error {code}: {message}")]
    Backend { code: String, message: String },

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Get the error code for this error
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(e) => e.error_code(),
            Self::Cache(e) => e.error_code(),
            Self::Config(e) => e.error_code(),
            Self::Pool(e) => e.error_code(),
            Self::Backend { .. } => "backend_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the caller may retry the operation on a fresh connection.
    ///
    /// Transport failures and timeouts are retryable; protocol violations,
    /// cancellations and configuration problems are not.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(ConnectionError::Lost(_) | ConnectionError::Io(_)) | Self::Timeout
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Connection(ConnectionError::Io(e))
    }
}

/// Result alias used across the workspace
pub type Result<T, E = Error> = std::result::Result<T, E>;
