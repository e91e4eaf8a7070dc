use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One webhook delivery attempt as reported by GitHub's delivery history.
///
/// Read-only: GitHub creates these, this system never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeliveryEvent {
    /// Monotonically increasing attempt id, used as the checkpoint cursor
    pub id: i64,
    /// Delivery id, stable across redelivery attempts (`X-GitHub-Delivery`)
    pub guid: String,
    /// HTTP status the receiver answered with (0 when no response was received)
    pub status_code: i32,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub redelivery: bool,
}

impl DeliveryEvent {
    /// Whether the original attempt was answered with a 2xx
    pub fn succeeded(&self) -> bool {
        (200..=299).contains(&self.status_code)
    }

    /// Value stored in the checkpoint table for this delivery
    pub fn checkpoint_value(&self) -> String {
        self.id.to_string()
    }
}
