use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Reconciliation watermark for one GitHub domain.
///
/// Rows are appended, never updated; the newest `created_at` per domain is current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Checkpoint {
    pub value: String,
    pub domain: String,
    pub created_at: DateTime<Utc>,
}
