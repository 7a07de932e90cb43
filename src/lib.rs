//! Sluice - Leaky-Bucket Request Admission
//!
//! This crate decides whether an action identified by a key may proceed now,
//! and if not, how long the caller must wait. Each key owns a bucket of
//! allowance that drains by one unit per admitted action and refills at a
//! fixed rate up to a burst capacity. Bucket state lives behind a pluggable
//! [`ratelimit::Backend`], so the same engine runs against in-memory or
//! external stores.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{Error, Result};
pub use ratelimit::{Backend, BucketState, Decision, Limiter, MemoryBackend, StorageError};
