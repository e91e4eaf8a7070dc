//! Topic publishing for accepted webhook events.

pub mod pubsub;

use async_trait::async_trait;

use crate::auth::GcpAuthError;

pub use pubsub::PubSubPublisher;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to authenticate publish to {topic}: {source}")]
    Auth {
        topic: String,
        #[source]
        source: GcpAuthError,
    },

    #[error("failed to publish to {topic}: {source}")]
    Request {
        topic: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("publish to {topic} returned HTTP {status}: {body}")]
    Status {
        topic: String,
        status: u16,
        body: String,
    },

    #[error("publish to {topic} returned no message id")]
    MissingMessageId { topic: String },
}

/// A message topic
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one message and returns the id the topic assigned to it
    async fn publish(&self, data: &[u8]) -> Result<String, PublishError>;
}
