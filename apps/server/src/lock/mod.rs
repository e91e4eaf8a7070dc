//! Cross-process mutual exclusion for the retry job.
//!
//! A lock is a lease: it is held until released or until its TTL passes,
//! whichever comes first. There is no renewal, so a holder must finish its
//! work within the TTL it acquired with.

pub mod gcs;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::GcpAuthError;

pub use gcs::GcsLock;

/// Longest lease a lock may be taken for
pub const MAX_LOCK_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Another process holds an unexpired lease
    #[error("lock {name} is held by another process until {expires_at}")]
    Held {
        name: String,
        expires_at: DateTime<Utc>,
    },

    #[error("failed to authenticate lock request: {0}")]
    Auth(#[from] GcpAuthError),

    #[error("lock request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("lock {operation} on {name} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        name: String,
        status: u16,
        body: String,
    },

    #[error("lock object {name} is unreadable: {reason}")]
    Corrupt { name: String, reason: String },

    /// The object kept disappearing between a failed create and the read of its holder
    #[error("lock object {name} vanished while acquiring, no holder observed")]
    Vanished { name: String },

    #[error("lock TTL {ttl:?} is out of range")]
    InvalidTtl { ttl: Duration },
}

impl LockError {
    /// Whether the lock is simply taken, as opposed to a failure to talk to the backend
    pub fn is_held(&self) -> bool {
        matches!(self, LockError::Held { .. })
    }
}

/// A named lease shared between processes
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Takes the lease for `ttl`, failing with [`LockError::Held`] if another holder is active
    async fn acquire(&self, ttl: Duration) -> Result<(), LockError>;

    /// Releases the lease if this instance holds it.
    ///
    /// Safe to call after a failed or partial acquire, and more than once.
    async fn close(&self) -> Result<(), LockError>;
}
