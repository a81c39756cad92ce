//! Typed parameter and column values.
//!
//! Parameters go to the backend in binary format where the type has a
//! fixed-width network representation (integers, floats, bool, bytea,
//! arrays) and in text format otherwise (text, timestamps). Result columns
//! are requested in text format and decoded by their declared OID.

use bytes::{BufMut, Bytes, BytesMut};

use velo_error::{ConnectionError, Error, Result};

use crate::protocol::constants::*;

fn protocol(msg: impl Into<String>) -> Error {
    ConnectionError::Protocol(msg.into()).into()
}

/// One typed SQL value, parameter or column.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    /// SQL NULL
    Null,
    /// `boolean`
    Bool(bool),
    /// `smallint`
    Int2(i16),
    /// `integer`
    Int4(i32),
    /// `bigint`
    Int8(i64),
    /// `real`
    Float4(f32),
    /// `double precision`
    Float8(f64),
    /// `text` / `varchar`
    Text(String),
    /// `bytea`
    Bytea(Bytes),
    /// `timestamp` / `timestamptz`, carried in its text form
    Timestamp(String),
    /// `integer[]`, used for multi-key fetches
    Int4Array(Vec<i32>),
    /// `bigint[]`, used for multi-key fetches
    Int8Array(Vec<i64>),
    /// `text[]`, used for multi-key fetches
    TextArray(Vec<String>),
}

impl PgValue {
    /// The OID declared for this value in Parse messages.
    #[must_use]
    pub fn type_oid(&self) -> u32 {
        match self {
            PgValue::Null => 0, // let the backend infer
            PgValue::Bool(_) => OID_BOOL,
            PgValue::Int2(_) => OID_INT2,
            PgValue::Int4(_) => OID_INT4,
            PgValue::Int8(_) => OID_INT8,
            PgValue::Float4(_) => OID_FLOAT4,
            PgValue::Float8(_) => OID_FLOAT8,
            PgValue::Text(_) => OID_TEXT,
            PgValue::Bytea(_) => OID_BYTEA,
            PgValue::Timestamp(_) => OID_TIMESTAMP,
            PgValue::Int4Array(_) => OID_INT4_ARRAY,
            PgValue::Int8Array(_) => OID_INT8_ARRAY,
            PgValue::TextArray(_) => OID_TEXT_ARRAY,
        }
    }

    /// The wire format this value is encoded with in Bind messages.
    #[must_use]
    pub fn format(&self) -> i16 {
        match self {
            PgValue::Text(_) | PgValue::Timestamp(_) => FORMAT_TEXT,
            _ => FORMAT_BINARY,
        }
    }

    /// Append the value payload (without length prefix) in its wire format.
    ///
    /// `Null` has no payload; Bind encodes it as length -1.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            PgValue::Null => {}
            PgValue::Bool(v) => buf.put_u8(u8::from(*v)),
            PgValue::Int2(v) => buf.put_i16(*v),
            PgValue::Int4(v) => buf.put_i32(*v),
            PgValue::Int8(v) => buf.put_i64(*v),
            PgValue::Float4(v) => buf.put_f32(*v),
            PgValue::Float8(v) => buf.put_f64(*v),
            PgValue::Text(v) | PgValue::Timestamp(v) => buf.put_slice(v.as_bytes()),
            PgValue::Bytea(v) => buf.put_slice(v),
            PgValue::Int4Array(v) => {
                encode_array_header(buf, OID_INT4, v.len());
                for item in v {
                    buf.put_i32(4);
                    buf.put_i32(*item);
                }
            }
            PgValue::Int8Array(v) => {
                encode_array_header(buf, OID_INT8, v.len());
                for item in v {
                    buf.put_i32(8);
                    buf.put_i64(*item);
                }
            }
            PgValue::TextArray(v) => {
                encode_array_header(buf, OID_TEXT, v.len());
                for item in v {
                    buf.put_i32(item.len() as i32);
                    buf.put_slice(item.as_bytes());
                }
            }
        }
    }

    /// Decode a text-format column by its declared OID.
    ///
    /// OIDs outside the supported set surface as `Text` so unusual columns
    /// stay readable without widening the type enum.
    pub fn decode_text(oid: u32, raw: &[u8]) -> Result<PgValue> {
        let text = std::str::from_utf8(raw).map_err(|_| protocol("invalid utf-8 in column"))?;
        let parsed = match oid {
            OID_BOOL => PgValue::Bool(text == "t"),
            OID_INT2 => PgValue::Int2(parse_number(text, "int2")?),
            OID_INT4 => PgValue::Int4(parse_number(text, "int4")?),
            OID_INT8 => PgValue::Int8(parse_number(text, "int8")?),
            OID_FLOAT4 => PgValue::Float4(parse_number(text, "float4")?),
            OID_FLOAT8 => PgValue::Float8(parse_number(text, "float8")?),
            OID_BYTEA => PgValue::Bytea(decode_hex_bytea(text)?),
            OID_TIMESTAMP | OID_TIMESTAMPTZ => PgValue::Timestamp(text.to_string()),
            _ => PgValue::Text(text.to_string()),
        };
        Ok(parsed)
    }

    /// Whether this value is SQL NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }
}

fn encode_array_header(buf: &mut BytesMut, elem_oid: u32, len: usize) {
    buf.put_i32(1); // dimensions
    buf.put_i32(0); // no null bitmap
    buf.put_u32(elem_oid);
    buf.put_i32(len as i32);
    buf.put_i32(1); // lower bound
}

fn parse_number<T: std::str::FromStr>(text: &str, kind: &str) -> Result<T> {
    text.parse()
        .map_err(|_| protocol(format!("malformed {kind} column: {text:?}")))
}

/// `bytea` text output is `\x` followed by lowercase hex.
fn decode_hex_bytea(text: &str) -> Result<Bytes> {
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| protocol("bytea column without \\x prefix"))?;
    if hex.len() % 2 != 0 {
        return Err(protocol("odd-length bytea column"));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    let digits = hex.as_bytes();
    for pair in digits.chunks_exact(2) {
        let hi = hex_digit(pair[0])?;
        let lo = hex_digit(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(Bytes::from(out))
}

fn hex_digit(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(protocol("invalid hex digit in bytea column")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_encode_big_endian() {
        let mut buf = BytesMut::new();
        PgValue::Int4(0x0102_0304).encode(&mut buf);
        assert_eq!(&buf[..], &[1, 2, 3, 4]);

        let mut buf = BytesMut::new();
        PgValue::Int8(1).encode(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn int8_array_layout() {
        let mut buf = BytesMut::new();
        PgValue::Int8Array(vec![7, 9]).encode(&mut buf);

        // ndim=1, flags=0, oid, count=2, lbound=1, then (len, value) pairs
        assert_eq!(&buf[0..4], &1i32.to_be_bytes());
        assert_eq!(&buf[4..8], &0i32.to_be_bytes());
        assert_eq!(&buf[8..12], &OID_INT8.to_be_bytes());
        assert_eq!(&buf[12..16], &2i32.to_be_bytes());
        assert_eq!(&buf[16..20], &1i32.to_be_bytes());
        assert_eq!(&buf[20..24], &8i32.to_be_bytes());
        assert_eq!(&buf[24..32], &7i64.to_be_bytes());
    }

    #[test]
    fn text_columns_decode_by_oid() {
        assert_eq!(
            PgValue::decode_text(OID_INT8, b"42").expect("int8"),
            PgValue::Int8(42)
        );
        assert_eq!(
            PgValue::decode_text(OID_BOOL, b"t").expect("bool"),
            PgValue::Bool(true)
        );
        assert_eq!(
            PgValue::decode_text(OID_BOOL, b"f").expect("bool"),
            PgValue::Bool(false)
        );
        assert_eq!(
            PgValue::decode_text(OID_FLOAT8, b"1.5").expect("float8"),
            PgValue::Float8(1.5)
        );
        assert_eq!(
            PgValue::decode_text(OID_TEXT, b"hello").expect("text"),
            PgValue::Text("hello".to_string())
        );
    }

    #[test]
    fn bytea_decodes_hex_form() {
        assert_eq!(
            PgValue::decode_text(OID_BYTEA, b"\\x4142").expect("bytea"),
            PgValue::Bytea(Bytes::from_static(b"AB"))
        );
        assert!(PgValue::decode_text(OID_BYTEA, b"4142").is_err());
        assert!(PgValue::decode_text(OID_BYTEA, b"\\x414").is_err());
    }

    #[test]
    fn timestamps_stay_textual() {
        let v = PgValue::decode_text(OID_TIMESTAMP, b"2026-08-01 12:00:00").expect("timestamp");
        assert_eq!(v, PgValue::Timestamp("2026-08-01 12:00:00".to_string()));
    }

    #[test]
    fn malformed_numbers_are_protocol_errors() {
        let err = PgValue::decode_text(OID_INT4, b"forty-two").expect_err("reject");
        assert_eq!(err.error_code(), "protocol_error");
    }

    #[test]
    fn unknown_oids_fall_back_to_text() {
        let v = PgValue::decode_text(2950, b"a-uuid").expect("fallback");
        assert_eq!(v, PgValue::Text("a-uuid".to_string()));
    }
}
