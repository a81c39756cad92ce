//! Frontend message encoders.
//!
//! Every function appends one complete frame to the caller's write buffer.
//! Frames carry a 4-byte big-endian length that includes itself but not the
//! tag byte; the startup packet has no tag.

use bytes::{BufMut, BytesMut};

use super::constants::*;
use crate::types::PgValue;

/// Append a tagged frame, backpatching the length word.
fn with_frame(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let len_pos = buf.len();
    buf.put_i32(0);
    body(buf);
    let frame_len = (buf.len() - len_pos) as i32;
    buf[len_pos..len_pos + 4].copy_from_slice(&frame_len.to_be_bytes());
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

/// Startup packet: protocol version plus `user`/`database` parameters.
pub fn startup(buf: &mut BytesMut, user: &str, database: &str) {
    let len_pos = buf.len();
    buf.put_i32(0);
    buf.put_i32(PROTOCOL_VERSION);
    put_cstr(buf, "user");
    put_cstr(buf, user);
    put_cstr(buf, "database");
    put_cstr(buf, database);
    buf.put_u8(0);
    let frame_len = (buf.len() - len_pos) as i32;
    buf[len_pos..len_pos + 4].copy_from_slice(&frame_len.to_be_bytes());
}

/// Cleartext password response.
pub fn password(buf: &mut BytesMut, password: &str) {
    with_frame(buf, MSG_PASSWORD, |b| put_cstr(b, password));
}

/// SASLInitialResponse: chosen mechanism plus the client-first message.
pub fn sasl_initial(buf: &mut BytesMut, mechanism: &str, initial: &[u8]) {
    with_frame(buf, MSG_PASSWORD, |b| {
        put_cstr(b, mechanism);
        b.put_i32(initial.len() as i32);
        b.put_slice(initial);
    });
}

/// SASLResponse: client-final message.
pub fn sasl_response(buf: &mut BytesMut, data: &[u8]) {
    with_frame(buf, MSG_PASSWORD, |b| b.put_slice(data));
}

/// Parse: name a statement (empty string = the unnamed statement).
///
/// Parameter OIDs pin the types the backend would otherwise infer.
pub fn parse(buf: &mut BytesMut, statement: &str, sql: &str, param_oids: &[u32]) {
    with_frame(buf, MSG_PARSE, |b| {
        put_cstr(b, statement);
        put_cstr(b, sql);
        b.put_i16(param_oids.len() as i16);
        for oid in param_oids {
            b.put_u32(*oid);
        }
    });
}

/// Bind parameter values to a statement, producing a portal.
///
/// Per-parameter format codes are emitted (binary for fixed-width types,
/// text for text and timestamps). Result columns are requested in text
/// format (zero result-format codes).
pub fn bind(buf: &mut BytesMut, portal: &str, statement: &str, params: &[PgValue]) {
    with_frame(buf, MSG_BIND, |b| {
        put_cstr(b, portal);
        put_cstr(b, statement);
        b.put_i16(params.len() as i16);
        for p in params {
            b.put_i16(p.format());
        }
        b.put_i16(params.len() as i16);
        for p in params {
            match p {
                PgValue::Null => b.put_i32(-1),
                _ => {
                    let len_pos = b.len();
                    b.put_i32(0);
                    p.encode(b);
                    let value_len = (b.len() - len_pos - 4) as i32;
                    b[len_pos..len_pos + 4].copy_from_slice(&value_len.to_be_bytes());
                }
            }
        }
        b.put_i16(0); // all result columns in text format
    });
}

/// Describe a portal (yields RowDescription or NoData).
pub fn describe_portal(buf: &mut BytesMut, portal: &str) {
    with_frame(buf, MSG_DESCRIBE, |b| {
        b.put_u8(b'P');
        put_cstr(b, portal);
    });
}

/// Describe a prepared statement.
pub fn describe_statement(buf: &mut BytesMut, statement: &str) {
    with_frame(buf, MSG_DESCRIBE, |b| {
        b.put_u8(b'S');
        put_cstr(b, statement);
    });
}

/// Execute a portal. `max_rows == 0` means no limit.
pub fn execute(buf: &mut BytesMut, portal: &str, max_rows: i32) {
    with_frame(buf, MSG_EXECUTE, |b| {
        put_cstr(b, portal);
        b.put_i32(max_rows);
    });
}

/// Sync: close the implicit transaction and ask for ReadyForQuery.
pub fn sync(buf: &mut BytesMut) {
    with_frame(buf, MSG_SYNC, |_| {});
}

/// Close a named prepared statement.
pub fn close_statement(buf: &mut BytesMut, statement: &str) {
    with_frame(buf, MSG_CLOSE, |b| {
        b.put_u8(b'S');
        put_cstr(b, statement);
    });
}

/// Terminate: orderly connection shutdown.
pub fn terminate(buf: &mut BytesMut) {
    with_frame(buf, MSG_TERMINATE, |_| {});
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_frame_layout() {
        let mut buf = BytesMut::new();
        startup(&mut buf, "alice", "app");

        let len = i32::from_be_bytes(buf[0..4].try_into().expect("length word"));
        assert_eq!(len as usize, buf.len());
        assert_eq!(&buf[4..8], PROTOCOL_VERSION.to_be_bytes());
        assert_eq!(buf[buf.len() - 1], 0, "startup ends with a terminator byte");
    }

    #[test]
    fn sync_is_five_bytes() {
        let mut buf = BytesMut::new();
        sync(&mut buf);
        assert_eq!(&buf[..], &[MSG_SYNC, 0, 0, 0, 4]);
    }

    #[test]
    fn bind_encodes_null_as_minus_one() {
        let mut buf = BytesMut::new();
        bind(&mut buf, "", "", &[PgValue::Null]);

        // tag + len + "" + "" + 1 format code + 1 value (-1) + 0 result formats
        assert_eq!(buf[0], MSG_BIND);
        let len = i32::from_be_bytes(buf[1..5].try_into().expect("length word"));
        assert_eq!(len as usize + 1, buf.len());
        // -1 value length sits right after the parameter count
        let tail = &buf[buf.len() - 6..];
        assert_eq!(tail, &[0xff, 0xff, 0xff, 0xff, 0, 0]);
    }

    #[test]
    fn bind_backpatches_value_length() {
        let mut buf = BytesMut::new();
        bind(&mut buf, "", "", &[PgValue::Int8(7)]);
        // Find the 8-byte big-endian payload; it is length-prefixed with 8.
        let needle = [0u8, 0, 0, 8, 0, 0, 0, 0, 0, 0, 0, 7];
        assert!(
            buf.windows(needle.len()).any(|w| w == needle),
            "int8 parameter must be length-prefixed binary"
        );
    }

    #[test]
    fn parse_carries_param_oids() {
        let mut buf = BytesMut::new();
        parse(&mut buf, "", "SELECT $1", &[OID_INT8]);
        let needle = [0u8, 1, 0, 0, 0, 20]; // count=1, oid=20
        assert!(buf.windows(needle.len()).any(|w| w == needle));
    }
}
