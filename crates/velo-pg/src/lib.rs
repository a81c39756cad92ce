//! velo-pg: PostgreSQL extended-query wire client
//!
//! A minimal, async client for the PostgreSQL v3 wire protocol built
//! directly on tokio. One connection owns one socket and drives the
//! extended-query message flow (parse / bind / describe / execute / sync)
//! with at most one request in flight.
//!
//! Supported:
//!
//! * Startup, cleartext and SCRAM-SHA-256 authentication
//! * Extended Query protocol (unnamed and named prepared statements)
//! * Typed parameters and columns (integers, floats, text, bytea, bool,
//!   timestamp-as-text, null, and int4/int8/text arrays for `= ANY($1)`)
//! * Pooling with exclusive leases and background reconnection
//!
//! Explicitly NOT supported:
//!
//! * Simple Query protocol and multi-statement queries
//! * COPY protocol
//! * TLS
//! * LISTEN/NOTIFY

#![warn(rust_2018_idioms)]

pub mod auth;
pub mod conninfo;
pub mod connection;
pub mod pool;
pub mod protocol;
pub mod result;
pub mod types;

pub use conninfo::PgConfig;
pub use connection::{ConnectionState, PgConnection};
pub use pool::{ConnectionGuard, PgPool};
pub use result::{PgResult, PgRow};
pub use types::PgValue;
