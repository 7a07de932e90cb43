//! Storage contract for per-key bucket state.
//!
//! A [`Backend`] persists one [`BucketState`] per key and knows nothing about
//! the leaky-bucket arithmetic. In-memory, networked and clustered stores all
//! plug into the same [`Limiter`](super::Limiter) through this trait.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors a backend may report.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The operation did not complete in time
    #[error("Backend operation timed out after {0:?}")]
    Timeout(Duration),

    /// Any other backend-specific failure
    #[error("Backend error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Persisted state of a single bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketState {
    /// Units currently available, within `[0, burst]`
    pub allowance: u64,
    /// Refill reference point, nanoseconds since the Unix epoch.
    ///
    /// This can be earlier than the time of the last write: it trails `now`
    /// by any partial progress toward the next unit. Do not use it as a
    /// write timestamp.
    pub last_accessed_ns: u64,
}

impl BucketState {
    /// Create a new bucket state.
    pub fn new(allowance: u64, last_accessed_ns: u64) -> Self {
        Self {
            allowance,
            last_accessed_ns,
        }
    }
}

/// Exclusive access to a key for the duration of one admission decision.
///
/// Dropping the guard releases the key. An unheld guard means the backend
/// offers no serialization for the key.
pub struct KeyGuard {
    inner: Option<Box<dyn Any + Send>>,
}

impl KeyGuard {
    /// Wrap a backend-specific lock guard.
    pub fn held<G: Send + 'static>(guard: G) -> Self {
        Self {
            inner: Some(Box::new(guard)),
        }
    }

    /// A guard that holds nothing.
    pub fn unheld() -> Self {
        Self { inner: None }
    }

    /// Whether this guard actually excludes other writers.
    pub fn is_held(&self) -> bool {
        self.inner.is_some()
    }
}

impl fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard")
            .field("held", &self.is_held())
            .finish()
    }
}

/// Trait for bucket state storage.
///
/// `get_state` must distinguish a key that was never written (`Ok(None)`)
/// from one holding `(0, 0)`. `set_state` is an unconditional upsert.
///
/// The limiter calls `lock`, then `get_state`, then `set_state` for the same
/// key, and drops the guard afterwards. Backends that can serialize that
/// sequence per key should return a held guard from `lock` and report
/// `serializes_updates() == true`. The defaults provide no serialization:
/// N concurrent callers reading the same stale allowance may then over-admit
/// by up to N-1.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read the stored state for `key`, or `None` if it has never been written.
    async fn get_state(&self, key: &str) -> Result<Option<BucketState>, StorageError>;

    /// Store `state` for `key`, creating the entry if absent.
    async fn set_state(&self, key: &str, state: BucketState) -> Result<(), StorageError>;

    /// Acquire exclusive access to `key` for one read-modify-write.
    async fn lock(&self, _key: &str) -> Result<KeyGuard, StorageError> {
        Ok(KeyGuard::unheld())
    }

    /// Whether `lock` serializes concurrent updates to the same key.
    fn serializes_updates(&self) -> bool {
        false
    }

    /// How long a bucket may go unwritten before the backend forgets it.
    ///
    /// An expired bucket reads back as a fresh, full one, so the limiter
    /// rejects a TTL shorter than the time needed to refill a bucket.
    fn state_ttl(&self) -> Option<Duration> {
        None
    }
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    async fn get_state(&self, key: &str) -> Result<Option<BucketState>, StorageError> {
        (**self).get_state(key).await
    }

    async fn set_state(&self, key: &str, state: BucketState) -> Result<(), StorageError> {
        (**self).set_state(key, state).await
    }

    async fn lock(&self, key: &str) -> Result<KeyGuard, StorageError> {
        (**self).lock(key).await
    }

    fn serializes_updates(&self) -> bool {
        (**self).serializes_updates()
    }

    fn state_ttl(&self) -> Option<Duration> {
        (**self).state_ttl()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBackend;

    #[async_trait]
    impl Backend for NullBackend {
        async fn get_state(&self, _key: &str) -> Result<Option<BucketState>, StorageError> {
            Ok(None)
        }

        async fn set_state(&self, _key: &str, _state: BucketState) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_lock_is_unheld() {
        let backend = NullBackend;

        let guard = backend.lock("key").await.unwrap();
        assert!(!guard.is_held());
        assert!(!backend.serializes_updates());
        assert_eq!(backend.state_ttl(), None);
    }

    #[test]
    fn test_key_guard_held() {
        let guard = KeyGuard::held(42u8);
        assert!(guard.is_held());
        assert_eq!(format!("{:?}", guard), "KeyGuard { held: true }");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Backend operation timed out after 250ms");

        let err = StorageError::Other("disk full".into());
        assert_eq!(err.to_string(), "Backend error: disk full");
    }
}
