//! RESP2 encoding and incremental decoding.
//!
//! The parser consumes nothing until a complete value is available: it
//! scans with a cursor and only advances the buffer once the value (and
//! every nested element) is fully present. It never reads past the end of
//! the current value, and malformed input is a permanent protocol error —
//! the connection must be torn down.

use bytes::{Buf, Bytes, BytesMut};

use velo_error::{ConnectionError, Error, Result};

use crate::value::RedisValue;

/// Upper bound on a single bulk string, matching the server-side limit.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Upper bound on array arity; anything larger is a framing error.
const MAX_ARRAY_LEN: i64 = 1024 * 1024;

fn protocol(msg: impl Into<String>) -> Error {
    ConnectionError::Protocol(msg.into()).into()
}

/// Encode one command as a multi-bulk array of binary-safe strings.
pub fn encode_command(buf: &mut BytesMut, args: &[impl AsRef<[u8]>]) {
    use bytes::BufMut;

    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        buf.put_u8(b'$');
        buf.put_slice(arg.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(arg);
        buf.put_slice(b"\r\n");
    }
}

/// Try to decode one complete value. `Ok(None)` means more bytes are
/// needed; the buffer is left untouched in that case.
pub fn decode_value(buf: &mut BytesMut) -> Result<Option<RedisValue>> {
    let mut pos = 0usize;
    match parse_at(buf, &mut pos)? {
        Some(value) => {
            buf.advance(pos);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn parse_at(buf: &[u8], pos: &mut usize) -> Result<Option<RedisValue>> {
    let Some(&tag) = buf.get(*pos) else {
        return Ok(None);
    };
    *pos += 1;
    match tag {
        b'+' => Ok(read_line(buf, pos)?.map(|line| RedisValue::Simple(lossy(line)))),
        b'-' => Ok(read_line(buf, pos)?.map(|line| RedisValue::Error(lossy(line)))),
        b':' => match read_line(buf, pos)? {
            None => Ok(None),
            Some(line) => Ok(Some(RedisValue::Integer(parse_int(line)?))),
        },
        b'$' => parse_bulk(buf, pos),
        b'*' => parse_array(buf, pos),
        other => Err(protocol(format!("unexpected RESP type byte 0x{other:02x}"))),
    }
}

fn parse_bulk(buf: &[u8], pos: &mut usize) -> Result<Option<RedisValue>> {
    let Some(line) = read_line(buf, pos)? else {
        return Ok(None);
    };
    let len = parse_int(line)?;
    if len == -1 {
        return Ok(Some(RedisValue::Null));
    }
    if len < 0 || len > MAX_BULK_LEN {
        return Err(protocol(format!("bulk length {len} out of range")));
    }
    let len = len as usize;
    if buf.len() < *pos + len + 2 {
        return Ok(None);
    }
    let payload = &buf[*pos..*pos + len];
    if &buf[*pos + len..*pos + len + 2] != b"\r\n" {
        return Err(protocol("bulk string not CRLF-terminated"));
    }
    let value = RedisValue::Bulk(Bytes::copy_from_slice(payload));
    *pos += len + 2;
    Ok(Some(value))
}

fn parse_array(buf: &[u8], pos: &mut usize) -> Result<Option<RedisValue>> {
    let Some(line) = read_line(buf, pos)? else {
        return Ok(None);
    };
    let n = parse_int(line)?;
    if n == -1 {
        return Ok(Some(RedisValue::NullArray));
    }
    if n < 0 || n > MAX_ARRAY_LEN {
        return Err(protocol(format!("array length {n} out of range")));
    }
    let mut items = Vec::with_capacity(n as usize);
    for _ in 0..n {
        match parse_at(buf, pos)? {
            Some(item) => items.push(item),
            None => return Ok(None),
        }
    }
    Ok(Some(RedisValue::Array(items)))
}

/// Read one CRLF-terminated line starting at `pos`, advancing past it.
fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<Option<&'a [u8]>> {
    let rest = &buf[(*pos).min(buf.len())..];
    let Some(cr) = memchr::memchr(b'\r', rest) else {
        return Ok(None);
    };
    match rest.get(cr + 1) {
        None => Ok(None),
        Some(b'\n') => {
            let line = &rest[..cr];
            *pos += cr + 2;
            Ok(Some(line))
        }
        Some(_) => Err(protocol("bare CR inside RESP line")),
    }
}

fn parse_int(line: &[u8]) -> Result<i64> {
    let text =
        std::str::from_utf8(line).map_err(|_| protocol("non-ascii RESP integer"))?;
    text.parse().map_err(|_| protocol(format!("malformed RESP integer: {text:?}")))
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn decode_all(input: &[u8]) -> Vec<RedisValue> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(v) = decode_value(&mut buf).expect("well-formed input") {
            out.push(v);
        }
        out
    }

    #[test]
    fn simple_string() {
        assert_eq!(decode_all(b"+PONG\r\n"), vec![RedisValue::Simple("PONG".into())]);
    }

    #[test]
    fn error_reply() {
        assert_eq!(
            decode_all(b"-WRONGTYPE not a string\r\n"),
            vec![RedisValue::Error("WRONGTYPE not a string".into())]
        );
    }

    #[test]
    fn integer_reply() {
        assert_eq!(decode_all(b":-42\r\n"), vec![RedisValue::Integer(-42)]);
    }

    #[test]
    fn bulk_and_null_bulk() {
        assert_eq!(
            decode_all(b"$5\r\nhello\r\n$-1\r\n$0\r\n\r\n"),
            vec![
                RedisValue::Bulk(Bytes::from_static(b"hello")),
                RedisValue::Null,
                RedisValue::Bulk(Bytes::new()),
            ]
        );
    }

    #[test]
    fn nested_arrays_and_null_array() {
        assert_eq!(
            decode_all(b"*2\r\n*1\r\n:1\r\n$2\r\nok\r\n*-1\r\n*0\r\n"),
            vec![
                RedisValue::Array(vec![
                    RedisValue::Array(vec![RedisValue::Integer(1)]),
                    RedisValue::Bulk(Bytes::from_static(b"ok")),
                ]),
                RedisValue::NullArray,
                RedisValue::Array(Vec::new()),
            ]
        );
    }

    #[test]
    fn partial_input_consumes_nothing() {
        let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);
        assert_eq!(decode_value(&mut buf).expect("partial"), None);
        assert_eq!(&buf[..], b"$5\r\nhel", "partial value must stay buffered");

        buf.extend_from_slice(b"lo\r\n");
        assert_eq!(
            decode_value(&mut buf).expect("complete"),
            Some(RedisValue::Bulk(Bytes::from_static(b"hello")))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn binary_safe_bulk() {
        let mut buf = BytesMut::from(&b"$3\r\n\x00\r\x01\r\n"[..]);
        assert_eq!(
            decode_value(&mut buf).expect("binary bulk"),
            Some(RedisValue::Bulk(Bytes::from_static(b"\x00\r\x01")))
        );
    }

    #[test]
    fn malformed_input_is_a_permanent_error() {
        let mut buf = BytesMut::from(&b"?what\r\n"[..]);
        let err = decode_value(&mut buf).expect_err("unknown type byte");
        assert_eq!(err.error_code(), "protocol_error");

        let mut buf = BytesMut::from(&b":notanumber\r\n"[..]);
        assert!(decode_value(&mut buf).is_err());

        let mut buf = BytesMut::from(&b"$-2\r\n"[..]);
        assert!(decode_value(&mut buf).is_err());

        let mut buf = BytesMut::from(&b"$3\r\nabcXY"[..]);
        assert!(decode_value(&mut buf).is_err());
    }

    #[test]
    fn encode_command_multi_bulk() {
        let mut buf = BytesMut::new();
        encode_command(&mut buf, &["SET", "key", "value"]);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");
    }

    #[test]
    fn encode_then_decode_roundtrips_as_array() {
        let mut buf = BytesMut::new();
        encode_command(&mut buf, &["GET", "k"]);
        let decoded = decode_value(&mut buf).expect("decode").expect("complete");
        assert_eq!(
            decoded,
            RedisValue::Array(vec![
                RedisValue::Bulk(Bytes::from_static(b"GET")),
                RedisValue::Bulk(Bytes::from_static(b"k")),
            ])
        );
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..128)) {
            let mut buf = BytesMut::from(&data[..]);
            loop {
                let before = buf.len();
                match decode_value(&mut buf) {
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => break,
                }
                if buf.len() == before {
                    break;
                }
            }
        }

        #[test]
        fn chunked_delivery_matches_whole_delivery(split in 1usize..30) {
            let input: &[u8] = b"*2\r\n$3\r\nfoo\r\n:7\r\n";
            let split = split.min(input.len());

            let mut whole = BytesMut::from(input);
            let expected = decode_value(&mut whole).expect("decode").expect("complete");

            let mut buf = BytesMut::from(&input[..split]);
            let first = decode_value(&mut buf).expect("prefix");
            if split < input.len() {
                prop_assert!(first.is_none());
                buf.extend_from_slice(&input[split..]);
                let second = decode_value(&mut buf).expect("decode").expect("complete");
                prop_assert_eq!(second, expected);
            } else {
                prop_assert_eq!(first, Some(expected));
            }
        }
    }
}
