//! velo-redis: RESP2 wire client
//!
//! A pipelined async Redis client speaking the RESP2 text protocol over
//! tokio. Replies arrive in submission order, so any number of commands may
//! be in flight on one connection; a reactor-local reader task matches each
//! reply to its waiter FIFO.
//!
//! Supported:
//!
//! * Multi-bulk commands (binary-safe arguments)
//! * Simple strings, errors, integers, bulk strings (possibly null), and
//!   arrays (possibly nested, possibly null)
//! * Optional AUTH at connect
//! * Round-robin pooling over shared clients
//!
//! Inline-command mode is not supported.

#![warn(rust_2018_idioms)]

pub mod client;
pub mod pool;
pub mod resp;
pub mod value;

pub use client::RedisClient;
pub use pool::RedisPool;
pub use value::RedisValue;
