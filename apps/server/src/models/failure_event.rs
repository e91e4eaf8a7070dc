use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A failed publish attempt for a delivery, counted against the retry limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct FailureEventEntry {
    pub delivery_id: String,
    pub created_at: DateTime<Utc>,
}
