//! Decoded RESP2 values.

use bytes::Bytes;

/// One RESP2 reply.
///
/// A null bulk string ([`RedisValue::Null`]) and a null array
/// ([`RedisValue::NullArray`]) are distinct values: `GET missing` yields
/// the former, a timed-out `BLPOP` the latter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisValue {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR …\r\n` — an application-level backend error, carried in-band
    Error(String),
    /// `:42\r\n`
    Integer(i64),
    /// `$5\r\nhello\r\n`
    Bulk(Bytes),
    /// `$-1\r\n`
    Null,
    /// `*2\r\n…` — possibly nested
    Array(Vec<RedisValue>),
    /// `*-1\r\n`
    NullArray,
}

impl RedisValue {
    /// Whether this is a simple or bulk string.
    #[must_use]
    pub fn is_string(&self) -> bool {
        matches!(self, RedisValue::Simple(_) | RedisValue::Bulk(_))
    }

    /// Whether this is an in-band backend error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, RedisValue::Error(_))
    }

    /// String view of a simple or valid-UTF-8 bulk reply.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RedisValue::Simple(s) => Some(s),
            RedisValue::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Raw bytes of a simple or bulk reply.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RedisValue::Simple(s) => Some(s.as_bytes()),
            RedisValue::Bulk(b) => Some(b),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer reply.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RedisValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Error message, if this is an error reply.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            RedisValue::Error(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_bulk_and_null_array_are_distinct() {
        assert_ne!(RedisValue::Null, RedisValue::NullArray);
        assert_ne!(RedisValue::Null, RedisValue::Bulk(Bytes::new()));
        assert_ne!(RedisValue::NullArray, RedisValue::Array(Vec::new()));
    }

    #[test]
    fn string_accessors() {
        assert_eq!(RedisValue::Simple("PONG".into()).as_str(), Some("PONG"));
        assert_eq!(RedisValue::Bulk(Bytes::from_static(b"v")).as_str(), Some("v"));
        assert_eq!(RedisValue::Integer(3).as_str(), None);
        assert!(RedisValue::Simple("PONG".into()).is_string());
        assert!(!RedisValue::Null.is_string());
    }
}
