//! velo-io: single-threaded reactor and lazy task primitives
//!
//! This crate provides the event loop every other velo crate runs on:
//!
//! * [`IoContext`] — a readiness reactor owned by exactly one thread, with
//!   timers, raw-fd watches and deterministic cross-thread wake-ups
//! * [`Task`] — a lazy, one-shot, move-only unit of cooperative work
//! * [`Backoff`] — the reconnect backoff policy shared by the pools
//!
//! # Threading model
//!
//! One `IoContext` is owned and driven by one thread. All per-reactor state
//! (connections, pending queues, timers) is mutated on that thread only.
//! Other threads communicate exclusively through [`IoHandle::post`], which
//! enqueues a callback on a lock-protected queue and wakes the loop.

#![warn(rust_2018_idioms)]

pub mod backoff;
pub mod context;
pub mod task;

pub use backoff::Backoff;
pub use context::{Interest, IoContext, IoHandle, TimerId, WatchHandle};
pub use task::Task;
