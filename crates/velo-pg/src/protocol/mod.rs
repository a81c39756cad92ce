//! Postgres wire protocol implementation
//!
//! This module implements the subset of the Postgres wire protocol needed
//! for velo-pg:
//!
//! * Startup and authentication (cleartext, SCRAM-SHA-256)
//! * Extended Query protocol (parse / bind / describe / execute / sync)
//! * Result framing (RowDescription, DataRow)
//! * Error handling
//!
//! The decoder is incremental: partial frames stay buffered and parsing
//! resumes on the next readable event without backtracking.

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::decode_message;
pub use message::{AuthRequest, BackendMessage, ErrorFields, FieldDescription};
