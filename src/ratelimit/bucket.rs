//! Leaky-bucket arithmetic.
//!
//! Everything here is pure: given the configured parameters, the stored state
//! of a bucket (if any) and the current time, [`BucketParams::transition`]
//! computes the state to persist and how long the caller has to wait.

use std::time::Duration;

use super::backend::BucketState;
use crate::error::{Error, Result};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Validated refill parameters: `rate` units per `interval`, capped at `burst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketParams {
    rate: u64,
    interval: Duration,
    burst: u64,
}

/// Outcome of evaluating one admission request against a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State to write back
    pub next: BucketState,
    /// Zero if admitted, otherwise time until one unit is available
    pub wait: Duration,
}

impl Transition {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        self.wait.is_zero()
    }
}

impl BucketParams {
    /// Validate and build bucket parameters.
    pub fn new(rate: u64, interval: Duration, burst: u64) -> Result<Self> {
        if rate == 0 {
            return Err(Error::Config("rate must be positive".into()));
        }
        if interval.is_zero() {
            return Err(Error::Config("interval must be positive".into()));
        }
        if burst == 0 {
            return Err(Error::Config("burst must be positive".into()));
        }

        Ok(Self {
            rate,
            interval,
            burst,
        })
    }

    /// Units restored per interval.
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// The refill period corresponding to `rate`.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Bucket capacity.
    pub fn burst(&self) -> u64 {
        self.burst
    }

    /// Time needed to restore a single unit, rounded up.
    pub fn unit_period(&self) -> Duration {
        duration_from_nanos(self.unit_nanos())
    }

    /// Time needed to refill an empty bucket completely, rounded up.
    pub fn full_refill_period(&self) -> Duration {
        let rate = self.rate as u128;
        let needed = self.interval.as_nanos().saturating_mul(self.burst as u128);
        duration_from_nanos(needed.div_ceil(rate))
    }

    /// Compute the next state of a bucket at time `now_ns`.
    ///
    /// A missing bucket starts full. The stored timestamp of the result keeps
    /// any partial progress toward the next unit, so a caller that waits the
    /// returned duration is admitted on its next attempt.
    pub fn transition(&self, current: Option<BucketState>, now_ns: u64) -> Transition {
        let (available, anchor_ns) = match current {
            None => (self.burst, now_ns),
            Some(state) => self.refill(state, now_ns),
        };

        if available >= 1 {
            return Transition {
                next: BucketState::new(available - 1, anchor_ns),
                wait: Duration::ZERO,
            };
        }

        // Empty: nothing credited, anchor_ns <= now_ns
        let partial = (now_ns - anchor_ns) as u128;
        let wait = self.unit_nanos().saturating_sub(partial).max(1);

        Transition {
            next: BucketState::new(0, anchor_ns),
            wait: duration_from_nanos(wait),
        }
    }

    /// Returns the allowance after refilling and the new refill anchor.
    fn refill(&self, state: BucketState, now_ns: u64) -> (u64, u64) {
        // A timestamp ahead of `now` counts as no elapsed time.
        let elapsed = now_ns.saturating_sub(state.last_accessed_ns) as u128;

        // u64 * u64 always fits in u128
        let scaled = elapsed * self.rate as u128;
        let interval_ns = self.interval.as_nanos();
        let units = scaled / interval_ns;

        let allowance = state.allowance.min(self.burst) as u128;
        let total = allowance.saturating_add(units);

        if total >= self.burst as u128 {
            return (self.burst, now_ns);
        }

        // Time not yet converted into a unit, truncated so it never over-credits.
        let partial = ((scaled % interval_ns) / self.rate as u128) as u64;
        (total as u64, now_ns - partial)
    }

    fn unit_nanos(&self) -> u128 {
        self.interval.as_nanos().div_ceil(self.rate as u128)
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
}
