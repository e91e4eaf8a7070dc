use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::{PublishError, Publisher};
use crate::auth::GcpTokenSource;

#[derive(Serialize)]
struct PublishRequest<'a> {
    messages: [PubsubMessage<'a>; 1],
}

#[derive(Serialize)]
struct PubsubMessage<'a> {
    data: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Publishes to a Google Cloud Pub/Sub topic over the REST API
pub struct PubSubPublisher {
    client: reqwest::Client,
    tokens: Arc<GcpTokenSource>,
    /// `projects/<project>/topics/<topic>`
    topic: String,
    publish_url: String,
}

impl PubSubPublisher {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<GcpTokenSource>,
        endpoint: &str,
        project_id: &str,
        topic_id: &str,
    ) -> Self {
        let topic = format!("projects/{}/topics/{}", project_id, topic_id);
        let publish_url = format!("{}/v1/{}:publish", endpoint.trim_end_matches('/'), topic);

        Self {
            client,
            tokens,
            topic,
            publish_url,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Publisher for PubSubPublisher {
    async fn publish(&self, data: &[u8]) -> Result<String, PublishError> {
        let token = self.tokens.token().await.map_err(|source| PublishError::Auth {
            topic: self.topic.clone(),
            source,
        })?;

        let encoded = STANDARD.encode(data);
        let body = PublishRequest {
            messages: [PubsubMessage { data: &encoded }],
        };

        let response = self
            .client
            .post(&self.publish_url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|source| PublishError::Request {
                topic: self.topic.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Status {
                topic: self.topic.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PublishResponse =
            response
                .json()
                .await
                .map_err(|source| PublishError::Request {
                    topic: self.topic.clone(),
                    source,
                })?;

        parsed
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| PublishError::MissingMessageId {
                topic: self.topic.clone(),
            })
    }
}
