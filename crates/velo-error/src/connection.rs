//! Transport and wire-level connection errors.

/// Errors raised by backend connections.
///
/// Application-level backend errors (an SQL error response, a Redis `-ERR`
/// reply) are *not* represented here: they are payloads carried inside
/// successful results. This enum covers failures of the transport or of the
/// wire protocol itself, both of which invalidate the connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Transport failure; the connection is unusable and the caller may
    /// retry through the pool.
    #[error("connection lost: {0}")]
    Lost(String),

    /// Underlying I/O failure, equivalent to `Lost`.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed backend reply. Fatal to the connection: the stream can no
    /// longer be framed reliably and must be torn down.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Handshake authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Operation submitted on a connection that is closing or closed.
    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Lost(_) | Self::Io(_) | Self::Closed => "connection_lost",
            Self::Protocol(_) => "protocol_error",
            Self::Auth(_) => "auth_failed",
        }
    }
}
