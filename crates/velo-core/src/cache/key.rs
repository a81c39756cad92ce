//! Request fingerprints.
//!
//! A fingerprint must satisfy one rule above all: two requests with
//! identical fingerprints produce identical cached artifacts. Parameter
//! values are therefore part of the key — different parameters MUST yield
//! different fingerprints, otherwise one caller can observe another's
//! data.
//!
//! The fingerprint carries a precomputed xxh3-64 hash so map operations
//! compare cheaply; equality still requires byte-identical parameter
//! buffers, since a hash match alone proves nothing.

use std::rc::Rc;

use bytes::{BufMut, Bytes, BytesMut};
use xxhash_rust::xxh3::Xxh3;

use velo_pg::PgValue;

/// Small fixed set of request flags folded into the fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyFlags(u8);

impl KeyFlags {
    /// No flags.
    pub const NONE: KeyFlags = KeyFlags(0);
    /// Single-row lookup, eligible for batch coalescing.
    pub const POINT_LOOKUP: KeyFlags = KeyFlags(1);
    /// Multi-row list query.
    pub const LIST: KeyFlags = KeyFlags(1 << 1);
    /// Artifact is the JSON form rather than the binary form.
    pub const JSON_FORM: KeyFlags = KeyFlags(1 << 2);

    /// Whether every flag in `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: KeyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bits, as folded into the fingerprint hash.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for KeyFlags {
    type Output = KeyFlags;

    fn bitor(self, rhs: KeyFlags) -> KeyFlags {
        KeyFlags(self.0 | rhs.0)
    }
}

/// Canonical identity of a parsed request. Immutable after construction.
#[derive(Debug, Clone)]
pub struct QueryCacheKey {
    template: Rc<str>,
    params:   Bytes,
    flags:    KeyFlags,
    hash:     u64,
}

impl QueryCacheKey {
    /// The precomputed 64-bit fingerprint hash.
    #[must_use]
    pub fn hash64(&self) -> u64 {
        self.hash
    }

    /// The normalized statement template.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// The request flags.
    #[must_use]
    pub fn flags(&self) -> KeyFlags {
        self.flags
    }

    /// The encoded parameter buffer.
    #[must_use]
    pub fn params(&self) -> &[u8] {
        &self.params
    }
}

impl PartialEq for QueryCacheKey {
    fn eq(&self, other: &Self) -> bool {
        // Hash first (cheap reject); the hash is not a proof of equality,
        // so the buffers must match byte for byte as well.
        self.hash == other.hash
            && self.flags == other.flags
            && self.params == other.params
            && self.template == other.template
    }
}

impl Eq for QueryCacheKey {}

impl std::hash::Hash for QueryCacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Streaming writer encoding typed parameters into a compact tagged
/// buffer. Also used to serialize fetched rows into cache artifacts.
#[derive(Debug, Default)]
pub struct ParamWriter {
    buf: BytesMut,
}

const TAG_NULL: u8 = 0x00;
const TAG_BOOL_FALSE: u8 = 0x01;
const TAG_BOOL_TRUE: u8 = 0x02;
const TAG_I16: u8 = 0x03;
const TAG_I32: u8 = 0x04;
const TAG_I64: u8 = 0x05;
const TAG_F32: u8 = 0x06;
const TAG_F64: u8 = 0x07;
const TAG_TEXT: u8 = 0x08;
const TAG_BYTES: u8 = 0x09;
const TAG_TIMESTAMP: u8 = 0x0a;
const TAG_ARRAY: u8 = 0x0b;

impl ParamWriter {
    /// Fresh writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one typed value.
    pub fn write_value(&mut self, value: &PgValue) {
        match value {
            PgValue::Null => self.buf.put_u8(TAG_NULL),
            PgValue::Bool(false) => self.buf.put_u8(TAG_BOOL_FALSE),
            PgValue::Bool(true) => self.buf.put_u8(TAG_BOOL_TRUE),
            PgValue::Int2(v) => {
                self.buf.put_u8(TAG_I16);
                self.buf.put_i16(*v);
            }
            PgValue::Int4(v) => {
                self.buf.put_u8(TAG_I32);
                self.buf.put_i32(*v);
            }
            PgValue::Int8(v) => {
                self.buf.put_u8(TAG_I64);
                self.buf.put_i64(*v);
            }
            PgValue::Float4(v) => {
                self.buf.put_u8(TAG_F32);
                self.buf.put_f32(*v);
            }
            PgValue::Float8(v) => {
                self.buf.put_u8(TAG_F64);
                self.buf.put_f64(*v);
            }
            PgValue::Text(v) => self.write_var(TAG_TEXT, v.as_bytes()),
            PgValue::Timestamp(v) => self.write_var(TAG_TIMESTAMP, v.as_bytes()),
            PgValue::Bytea(v) => self.write_var(TAG_BYTES, v),
            PgValue::Int4Array(v) => {
                self.write_array_header(v.len());
                for item in v {
                    self.write_value(&PgValue::Int4(*item));
                }
            }
            PgValue::Int8Array(v) => {
                self.write_array_header(v.len());
                for item in v {
                    self.write_value(&PgValue::Int8(*item));
                }
            }
            PgValue::TextArray(v) => {
                self.write_array_header(v.len());
                for item in v {
                    self.write_var(TAG_TEXT, item.as_bytes());
                }
            }
        }
    }

    fn write_var(&mut self, tag: u8, payload: &[u8]) {
        self.buf.put_u8(tag);
        self.buf.put_u32(payload.len() as u32);
        self.buf.put_slice(payload);
    }

    fn write_array_header(&mut self, len: usize) {
        self.buf.put_u8(TAG_ARRAY);
        self.buf.put_u32(len as u32);
    }

    /// Finish and take the encoded buffer.
    #[must_use]
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Builds fingerprints from incoming requests.
pub struct QueryParser;

impl QueryParser {
    /// Normalize a statement template: trimmed, internal whitespace runs
    /// collapsed to single spaces.
    #[must_use]
    pub fn normalize(template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut in_gap = false;
        for c in template.trim().chars() {
            if c.is_whitespace() {
                in_gap = true;
            } else {
                if in_gap && !out.is_empty() {
                    out.push(' ');
                }
                in_gap = false;
                out.push(c);
            }
        }
        out
    }

    /// Construct the fingerprint of a request.
    #[must_use]
    pub fn fingerprint(template: &str, params: &[PgValue], flags: KeyFlags) -> QueryCacheKey {
        let template = Self::normalize(template);

        let mut writer = ParamWriter::new();
        for p in params {
            writer.write_value(p);
        }
        let params = writer.finish();

        let mut hasher = Xxh3::new();
        hasher.update(template.as_bytes());
        hasher.update(&[0, flags.bits()]);
        hasher.update(&params);

        QueryCacheKey {
            template: Rc::from(template),
            params,
            flags,
            hash: hasher.digest(),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn identical_requests_produce_identical_fingerprints() {
        let a = QueryParser::fingerprint(
            "SELECT data FROM articles WHERE id = $1",
            &[PgValue::Int8(7)],
            KeyFlags::POINT_LOOKUP,
        );
        let b = QueryParser::fingerprint(
            "SELECT data FROM articles WHERE id = $1",
            &[PgValue::Int8(7)],
            KeyFlags::POINT_LOOKUP,
        );
        assert_eq!(a, b);
        assert_eq!(a.hash64(), b.hash64());
    }

    #[test]
    fn different_parameters_produce_different_fingerprints() {
        let a = QueryParser::fingerprint("SELECT 1", &[PgValue::Int8(1)], KeyFlags::NONE);
        let b = QueryParser::fingerprint("SELECT 1", &[PgValue::Int8(2)], KeyFlags::NONE);
        assert_ne!(a, b, "different parameter values MUST produce different keys");
    }

    #[test]
    fn parameter_types_are_part_of_the_identity() {
        let as_i32 = QueryParser::fingerprint("Q", &[PgValue::Int4(1)], KeyFlags::NONE);
        let as_i64 = QueryParser::fingerprint("Q", &[PgValue::Int8(1)], KeyFlags::NONE);
        assert_ne!(as_i32, as_i64);
    }

    #[test]
    fn flags_are_part_of_the_identity() {
        let plain = QueryParser::fingerprint("Q", &[], KeyFlags::NONE);
        let json = QueryParser::fingerprint("Q", &[], KeyFlags::JSON_FORM);
        assert_ne!(plain, json);
    }

    #[test]
    fn whitespace_is_normalized() {
        let a = QueryParser::fingerprint("SELECT  1\n  FROM t", &[], KeyFlags::NONE);
        let b = QueryParser::fingerprint("SELECT 1 FROM t", &[], KeyFlags::NONE);
        assert_eq!(a, b);
        assert_eq!(a.template(), "SELECT 1 FROM t");
    }

    #[test]
    fn adjacent_strings_do_not_collide() {
        // The length prefix must keep ["ab","c"] and ["a","bc"] apart.
        let a = QueryParser::fingerprint(
            "Q",
            &[PgValue::Text("ab".into()), PgValue::Text("c".into())],
            KeyFlags::NONE,
        );
        let b = QueryParser::fingerprint(
            "Q",
            &[PgValue::Text("a".into()), PgValue::Text("bc".into())],
            KeyFlags::NONE,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn flags_contains() {
        let flags = KeyFlags::POINT_LOOKUP | KeyFlags::JSON_FORM;
        assert!(flags.contains(KeyFlags::POINT_LOOKUP));
        assert!(flags.contains(KeyFlags::JSON_FORM));
        assert!(!flags.contains(KeyFlags::LIST));
    }

    proptest! {
        #[test]
        fn equal_inputs_always_agree(id in any::<i64>(), text in ".{0,32}") {
            let params = [PgValue::Int8(id), PgValue::Text(text.clone())];
            let a = QueryParser::fingerprint("SELECT $1, $2", &params, KeyFlags::NONE);
            let b = QueryParser::fingerprint("SELECT $1, $2", &params, KeyFlags::NONE);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn different_ids_never_collide_in_full_equality(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            let ka = QueryParser::fingerprint("Q", &[PgValue::Int8(a)], KeyFlags::NONE);
            let kb = QueryParser::fingerprint("Q", &[PgValue::Int8(b)], KeyFlags::NONE);
            // Even on a hash collision, byte comparison keeps keys apart.
            prop_assert_ne!(ka, kb);
        }
    }
}
