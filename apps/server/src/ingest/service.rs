//! Idempotent webhook ingestion.
//!
//! A delivery is published to the events topic at most once per delivery id
//! recorded in the events log. When the publish fails, the delivery is
//! answered with a 5xx so GitHub retries it, and each failure is recorded.
//! Once `retry_limit` failures are on record the delivery goes to the
//! dead-letter topic instead, and GitHub is told it succeeded.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;

use crate::auth::signature::verify_signature;
use crate::datastore::{Datastore, TableName};
use crate::error::{AppError, AppResult};
use crate::models::EventRecord;
use crate::publisher::{PublishError, Publisher};

/// An inbound webhook request, headers already extracted
#[derive(Debug, Clone, Default)]
pub struct InboundDelivery {
    pub delivery_id: Option<String>,
    pub event: Option<String>,
    pub signature: Option<String>,
    pub body: Bytes,
}

/// How a delivery was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Published to the events topic
    Published,
    /// The events log already holds this delivery
    AlreadyReported,
    /// Retry limit reached, captured on the dead-letter topic
    DeadLettered,
}

/// Static settings for [`WebhookService`]
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub webhook_secret: String,
    pub retry_limit: u32,
    pub events_table: TableName,
    pub failure_events_table: TableName,
}

pub struct WebhookService {
    datastore: Arc<dyn Datastore>,
    events: Arc<dyn Publisher>,
    dead_letter: Arc<dyn Publisher>,
    settings: IngestSettings,
}

impl WebhookService {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        events: Arc<dyn Publisher>,
        dead_letter: Arc<dyn Publisher>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            datastore,
            events,
            dead_letter,
            settings,
        }
    }

    /// Validates, deduplicates and publishes one delivery
    pub async fn handle(&self, delivery: InboundDelivery) -> AppResult<IngestOutcome> {
        // 1. Payload must be present
        if delivery.body.is_empty() {
            return Err(AppError::Validation("Payload is empty".to_string()));
        }

        // 2. Signature must match the raw body
        let signature = delivery.signature.ok_or_else(|| {
            AppError::Validation("Missing X-Hub-Signature-256 header".to_string())
        })?;
        if !verify_signature(
            &delivery.body,
            &signature,
            self.settings.webhook_secret.as_bytes(),
        ) {
            return Err(AppError::Unauthorized(
                "Signature does not match payload".to_string(),
            ));
        }

        let delivery_id = delivery
            .delivery_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation("Missing X-GitHub-Delivery header".to_string()))?;
        let event = delivery
            .event
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AppError::Validation("Missing X-GitHub-Event header".to_string()))?;
        let payload = String::from_utf8(delivery.body.to_vec())
            .map_err(|_| AppError::Validation("Payload is not valid UTF-8".to_string()))?;

        // 3. Already in the events log: do not publish again
        let exists = self
            .datastore
            .delivery_event_exists(&self.settings.events_table, &delivery_id)
            .await
            .map_err(|e| {
                log::error!("Failed to check delivery {}: {}", delivery_id, e);
                e
            })?;
        if exists {
            log::info!("Delivery {} already recorded, skipping publish", delivery_id);
            return Ok(IngestOutcome::AlreadyReported);
        }

        // 4. Publish the canonical record
        let record = EventRecord {
            delivery_id,
            signature,
            received: Utc::now(),
            event,
            payload,
        };
        let message = record
            .to_message()
            .map_err(|e| AppError::Internal(format!("Failed to serialize event: {}", e)))?;

        match self.events.publish(&message).await {
            Ok(message_id) => {
                log::info!(
                    "Published {} delivery {} as message {}",
                    record.event,
                    record.delivery_id,
                    message_id
                );
                Ok(IngestOutcome::Published)
            }
            Err(e) => self.handle_publish_failure(&record.delivery_id, &message, e).await,
        }
    }

    /// Decides between recording another failure and dead-lettering the delivery
    async fn handle_publish_failure(
        &self,
        delivery_id: &str,
        message: &[u8],
        publish_error: PublishError,
    ) -> AppResult<IngestOutcome> {
        log::error!("Failed to publish delivery {}: {}", delivery_id, publish_error);

        // A failed count must not be followed by a failure write, it would hide the real error
        let exceeded = self
            .datastore
            .failure_events_exceeds_retry_limit(
                &self.settings.failure_events_table,
                delivery_id,
                self.settings.retry_limit,
            )
            .await
            .map_err(|e| {
                log::error!("Failed to count failures for delivery {}: {}", delivery_id, e);
                e
            })?;

        if exceeded {
            return match self.dead_letter.publish(message).await {
                Ok(message_id) => {
                    log::warn!(
                        "Delivery {} reached the retry limit of {}, dead-lettered as message {}",
                        delivery_id,
                        self.settings.retry_limit,
                        message_id
                    );
                    Ok(IngestOutcome::DeadLettered)
                }
                Err(e) => {
                    log::error!("Failed to dead-letter delivery {}: {}", delivery_id, e);
                    Err(AppError::Publish(e))
                }
            };
        }

        if let Err(e) = self
            .datastore
            .write_failure_event(&self.settings.failure_events_table, delivery_id, Utc::now())
            .await
        {
            log::error!(
                "Failed to record publish failure for delivery {}: {}",
                delivery_id,
                e
            );
        }

        // GitHub retries on 5xx
        Err(AppError::Publish(publish_error))
    }
}
