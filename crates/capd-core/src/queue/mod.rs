//! Retry queue manager.
//!
//! Owns the backoff schedule, deduplicates jobs by (channel, video) key, and
//! is the single authority for "is this job due, and may we start another
//! one". Every operation works on a loaded [`Snapshot`](crate::store::Snapshot)
//! plus the live [`ActiveTable`](crate::supervisor::ActiveTable); the caller
//! saves the snapshot afterwards.

mod backoff;
mod key;
mod manager;

pub use backoff::BackoffPolicy;
pub use key::JobKey;
pub use manager::{Admission, JobSeed, QueueCounts, RetryQueue};
