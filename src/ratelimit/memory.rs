//! In-process backend.
//!
//! State lives in a [`DashMap`] and every key gets its own async mutex, so
//! concurrent admissions for one key are serialized while different keys
//! proceed independently.
//!
//! With a TTL configured, expired buckets are dropped every
//! [`PURGE_EVERY_WRITES`] writes; [`MemoryBackend::purge_expired`] can also be
//! called directly. Without a TTL every key ever seen stays resident.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::backend::{Backend, BucketState, KeyGuard, StorageError};

/// Number of writes between automatic purges of expired buckets.
pub const PURGE_EVERY_WRITES: u64 = 256;

/// A stored bucket together with when it was last written.
#[derive(Debug, Clone, Copy)]
struct Entry {
    state: BucketState,
    written_at: Instant,
}

/// Thread-safe in-memory bucket store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Bucket state indexed by key
    entries: DashMap<String, Entry>,
    /// Per-key locks handed out by `lock`
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Entries not written for this long read as absent
    ttl: Option<Duration>,
    /// Writes since creation, drives automatic purging
    writes: AtomicU64,
}

impl MemoryBackend {
    /// Create a backend that keeps entries forever.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend whose entries expire `ttl` after their last write.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    /// The configured expiry, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Number of stored buckets, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no buckets are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every bucket and idle lock.
    pub fn clear(&self) {
        self.entries.clear();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Drop expired buckets and the idle locks that belonged to them.
    ///
    /// Returns the number of buckets removed.
    pub fn purge_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };

        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.written_at.elapsed() < ttl);
        let removed = before.saturating_sub(self.entries.len());

        // A lock still referenced elsewhere belongs to an in-flight decision.
        let entries = &self.entries;
        self.locks
            .retain(|key, lock| Arc::strong_count(lock) > 1 || entries.contains_key(key));

        if removed > 0 {
            debug!(removed = removed, "Purged expired buckets");
        }
        removed
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.ttl
            .map(|ttl| entry.written_at.elapsed() >= ttl)
            .unwrap_or(false)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_state(&self, key: &str) -> Result<Option<BucketState>, StorageError> {
        let state = self
            .entries
            .get(key)
            .filter(|entry| !self.is_expired(entry))
            .map(|entry| entry.state);

        trace!(key = %key, state = ?state, "Read bucket state");
        Ok(state)
    }

    async fn set_state(&self, key: &str, state: BucketState) -> Result<(), StorageError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                state,
                written_at: Instant::now(),
            },
        );

        trace!(key = %key, state = ?state, "Wrote bucket state");

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if self.ttl.is_some() && writes % PURGE_EVERY_WRITES == 0 {
            self.purge_expired();
        }
        Ok(())
    }

    async fn lock(&self, key: &str) -> Result<KeyGuard, StorageError> {
        // Clone out of the map so no shard lock is held while waiting.
        let lock = self
            .locks
            .entry(key.to_string())
            .or_default()
            .value()
            .clone();

        let guard = lock.lock_owned().await;
        Ok(KeyGuard::held(guard))
    }

    fn serializes_updates(&self) -> bool {
        true
    }

    fn state_ttl(&self) -> Option<Duration> {
        self.ttl
    }
}
