//! Protocol constants: message tags, authentication codes, type OIDs.

// Names mirror the protocol documentation; they are self-documenting.
#![allow(missing_docs)]

/// Protocol version 3.0, sent in the startup packet.
pub const PROTOCOL_VERSION: i32 = 196_608;

// Backend message tags
pub const MSG_AUTHENTICATION: u8 = b'R';
pub const MSG_PARAMETER_STATUS: u8 = b'S';
pub const MSG_BACKEND_KEY_DATA: u8 = b'K';
pub const MSG_READY_FOR_QUERY: u8 = b'Z';
pub const MSG_ROW_DESCRIPTION: u8 = b'T';
pub const MSG_DATA_ROW: u8 = b'D';
pub const MSG_COMMAND_COMPLETE: u8 = b'C';
pub const MSG_ERROR_RESPONSE: u8 = b'E';
pub const MSG_NOTICE_RESPONSE: u8 = b'N';
pub const MSG_PARSE_COMPLETE: u8 = b'1';
pub const MSG_BIND_COMPLETE: u8 = b'2';
pub const MSG_CLOSE_COMPLETE: u8 = b'3';
pub const MSG_NO_DATA: u8 = b'n';
pub const MSG_EMPTY_QUERY: u8 = b'I';
pub const MSG_PORTAL_SUSPENDED: u8 = b's';
pub const MSG_PARAMETER_DESCRIPTION: u8 = b't';

// Frontend message tags
pub const MSG_PASSWORD: u8 = b'p';
pub const MSG_PARSE: u8 = b'P';
pub const MSG_BIND: u8 = b'B';
pub const MSG_DESCRIBE: u8 = b'D';
pub const MSG_EXECUTE: u8 = b'E';
pub const MSG_SYNC: u8 = b'S';
pub const MSG_CLOSE: u8 = b'C';
pub const MSG_TERMINATE: u8 = b'X';

// Authentication request subcodes
pub const AUTH_OK: i32 = 0;
pub const AUTH_CLEARTEXT_PASSWORD: i32 = 3;
pub const AUTH_MD5_PASSWORD: i32 = 5;
pub const AUTH_SASL: i32 = 10;
pub const AUTH_SASL_CONTINUE: i32 = 11;
pub const AUTH_SASL_FINAL: i32 = 12;

// Error/notice field codes
pub const FIELD_SEVERITY: u8 = b'S';
pub const FIELD_CODE: u8 = b'C';
pub const FIELD_MESSAGE: u8 = b'M';
pub const FIELD_DETAIL: u8 = b'D';

// Type OIDs (pg_type.oid)
pub const OID_BOOL: u32 = 16;
pub const OID_BYTEA: u32 = 17;
pub const OID_INT8: u32 = 20;
pub const OID_INT2: u32 = 21;
pub const OID_INT4: u32 = 23;
pub const OID_TEXT: u32 = 25;
pub const OID_FLOAT4: u32 = 700;
pub const OID_FLOAT8: u32 = 701;
pub const OID_INT4_ARRAY: u32 = 1007;
pub const OID_TEXT_ARRAY: u32 = 1009;
pub const OID_INT8_ARRAY: u32 = 1016;
pub const OID_VARCHAR: u32 = 1043;
pub const OID_TIMESTAMP: u32 = 1114;
pub const OID_TIMESTAMPTZ: u32 = 1184;

// Wire format codes
pub const FORMAT_TEXT: i16 = 0;
pub const FORMAT_BINARY: i16 = 1;
