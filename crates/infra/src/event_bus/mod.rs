//! Broker-backed event bus implementations.
//!
//! The bus contract and the in-memory topic exchange live in
//! `ledgerflow-events`. This module provides the durable Redis Streams adapter.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisDeadLetterStore, RedisStreamsConfig, RedisStreamsError, RedisStreamsEventBus};
