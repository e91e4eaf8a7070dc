//! Reconciliation of webhook deliveries GitHub failed to make.

pub mod job;

use std::time::Duration;

use crate::datastore::DatastoreError;
use crate::github::GithubError;
use crate::lock::LockError;

pub use job::{JobSummary, RetryJob, RetryJobSettings};

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("failed to acquire lock: {0}")]
    AcquireLock(#[source] LockError),

    #[error("failed to read checkpoint: {0}")]
    ReadCheckpoint(#[source] DatastoreError),

    #[error("failed to list deliveries (cursor {cursor:?}): {source}")]
    ListDeliveries {
        cursor: Option<String>,
        #[source]
        source: GithubError,
    },

    #[error("failed to check events log for delivery {guid}: {source}")]
    ExistenceCheck {
        guid: String,
        #[source]
        source: DatastoreError,
    },

    #[error("failed to redeliver {delivery_id} ({guid}) and it is not in the events log: {source}")]
    Redeliver {
        delivery_id: i64,
        guid: String,
        #[source]
        source: GithubError,
    },

    #[error("failed to write checkpoint: {0}")]
    WriteCheckpoint(#[source] DatastoreError),

    #[error("lock TTL {ttl:?} is out of range, at most {max:?} is allowed")]
    InvalidLockTtl { ttl: Duration, max: Duration },

    #[error("retry pass exceeded its {limit:?} deadline")]
    DeadlineExceeded { limit: Duration },
}
