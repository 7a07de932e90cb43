//! Core admission engine.

use std::time::Duration;

use tracing::{debug, trace, warn};

use super::backend::Backend;
use super::bucket::BucketParams;
use super::clock::{Clock, SystemClock};
use super::StorageError;
use crate::config::LimiterConfig;
use crate::error::{Error, Result};

/// The result of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Zero if admitted, otherwise how long to wait before retrying
    pub wait: Duration,
    /// Allowance left in the bucket after this call
    pub remaining: u64,
}

impl Decision {
    /// Whether the action may proceed now.
    pub fn is_allowed(&self) -> bool {
        self.wait.is_zero()
    }
}

/// A leaky-bucket rate limiter over a pluggable [`Backend`].
///
/// The limiter keeps no per-key state of its own: every call reads the bucket
/// from the backend, applies the refill, and writes it back. Configuration is
/// fixed at construction, so differently configured limiters can share a
/// process (or a backend, given disjoint keys).
///
/// If the write-back fails after an admission was computed, the caller gets
/// an error but cannot tell whether the new state reached the backend.
pub struct Limiter<B, C = SystemClock> {
    /// Refill parameters
    params: BucketParams,
    /// Where bucket state lives
    backend: B,
    /// Time source
    clock: C,
}

impl<B: Backend> Limiter<B> {
    /// Create a limiter restoring `rate` units per `interval`, holding at most `burst`.
    ///
    /// Fails with [`Error::Config`] if any parameter is zero.
    pub fn new(rate: u64, interval: Duration, burst: u64, backend: B) -> Result<Self> {
        Self::with_clock(rate, interval, burst, backend, SystemClock)
    }

    /// Create a limiter from loaded configuration.
    pub fn from_config(config: &LimiterConfig, backend: B) -> Result<Self> {
        Self::new(config.rate, config.interval(), config.burst, backend)
    }
}

impl<B: Backend, C: Clock> Limiter<B, C> {
    /// Create a limiter reading time from `clock`.
    ///
    /// Also fails with [`Error::Config`] if the backend forgets buckets
    /// sooner than an empty one takes to refill.
    pub fn with_clock(
        rate: u64,
        interval: Duration,
        burst: u64,
        backend: B,
        clock: C,
    ) -> Result<Self> {
        let params = BucketParams::new(rate, interval, burst)?;

        if let Some(ttl) = backend.state_ttl() {
            let refill = params.full_refill_period();
            if ttl < refill {
                return Err(Error::Config(format!(
                    "backend TTL {:?} is shorter than the full refill period {:?}",
                    ttl, refill
                )));
            }
        }

        if !backend.serializes_updates() {
            warn!(
                "Backend does not serialize per-key updates; concurrent callers may over-admit"
            );
        }

        debug!(
            rate = rate,
            interval = ?interval,
            burst = burst,
            "Created rate limiter"
        );

        Ok(Self {
            params,
            backend,
            clock,
        })
    }

    /// Decide whether an action for `key` may proceed.
    ///
    /// Returns `Duration::ZERO` when admitted, or the time to wait before
    /// retrying. An error means no decision was made.
    pub async fn allow(&self, key: &str) -> Result<Duration> {
        self.check(key).await.map(|decision| decision.wait)
    }

    /// Like [`allow`](Self::allow), but also reports the remaining allowance.
    pub async fn check(&self, key: &str) -> Result<Decision> {
        // Hold the key for the whole read-modify-write.
        let guard = self
            .backend
            .lock(key)
            .await
            .map_err(|e| Error::storage(key, e))?;

        let now = self.clock.now_nanos();

        let current = self
            .backend
            .get_state(key)
            .await
            .map_err(|e| Error::storage(key, e))?;

        let transition = self.params.transition(current, now);

        trace!(
            key = %key,
            fresh = current.is_none(),
            allowance = transition.next.allowance,
            wait = ?transition.wait,
            "Evaluated bucket"
        );

        self.backend
            .set_state(key, transition.next)
            .await
            .map_err(|e| Error::storage(key, e))?;

        drop(guard);

        if !transition.is_admitted() {
            debug!(
                key = %key,
                wait = ?transition.wait,
                "Rate limit exceeded"
            );
        }

        Ok(Decision {
            wait: transition.wait,
            remaining: transition.next.allowance,
        })
    }

    /// Like [`allow`](Self::allow), bounded by `timeout`.
    ///
    /// If the timeout elapses the call fails with [`StorageError::Timeout`]; as
    /// with a failed write, the stored state may or may not have been updated.
    pub async fn allow_within(&self, key: &str, timeout: Duration) -> Result<Duration> {
        match tokio::time::timeout(timeout, self.allow(key)).await {
            Ok(result) => result,
            Err(_) => Err(Error::storage(key, StorageError::Timeout(timeout))),
        }
    }

    /// Units restored per interval.
    pub fn rate(&self) -> u64 {
        self.params.rate()
    }

    /// The refill period.
    pub fn interval(&self) -> Duration {
        self.params.interval()
    }

    /// Bucket capacity.
    pub fn burst(&self) -> u64 {
        self.params.burst()
    }

    /// The backend this limiter reads and writes.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}
