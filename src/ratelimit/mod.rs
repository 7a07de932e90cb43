//! Leaky-bucket rate limiting and state storage.

mod backend;
mod bucket;
mod clock;
mod limiter;
mod memory;

pub use backend::{Backend, BucketState, KeyGuard, StorageError};
pub use bucket::{BucketParams, Transition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{Decision, Limiter};
pub use memory::{MemoryBackend, PURGE_EVERY_WRITES};
