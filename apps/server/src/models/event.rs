use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical webhook event published to the events topic.
///
/// `delivery_id` is the idempotency key downstream consumers deduplicate on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub delivery_id: String,
    /// `X-Hub-Signature-256` header value, verified against `payload` before publish
    pub signature: String,
    /// Serialized as RFC3339
    pub received: DateTime<Utc>,
    /// GitHub event type from `X-GitHub-Event`
    pub event: String,
    /// Raw JSON body exactly as delivered
    pub payload: String,
}

impl EventRecord {
    /// Serializes the record as the topic message body
    pub fn to_message(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
