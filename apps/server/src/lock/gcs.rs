//! Lease lock stored as a Cloud Storage object.
//!
//! Acquisition is a create guarded by `ifGenerationMatch=0`, which only one
//! writer can win. The object body records when the lease expires; an expired
//! object is deleted (guarded by its generation) and the create retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use super::{DistributedLock, LockError};
use crate::auth::GcpTokenSource;

/// Conditional creates attempted per acquire (the second follows an expired takeover)
const MAX_CREATE_ATTEMPTS: usize = 2;

const GENERATION_HEADER: &str = "x-goog-generation";

/// Contents of the lock object
#[derive(Debug, Serialize, Deserialize)]
struct LockContents {
    holder: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    generation: String,
}

pub struct GcsLock {
    client: reqwest::Client,
    tokens: Arc<GcpTokenSource>,
    bucket: String,
    name: String,
    holder: String,
    upload_url: Url,
    object_url: Url,
    /// Generation of the object this instance created, if it holds the lease
    generation: Mutex<Option<String>>,
}

impl GcsLock {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<GcpTokenSource>,
        endpoint: &str,
        bucket: &str,
        name: &str,
    ) -> Result<Self, url::ParseError> {
        let base = Url::parse(endpoint)?;
        let upload_url = build_url(&base, &["upload", "storage", "v1", "b", bucket, "o"])?;
        let object_url = build_url(&base, &["storage", "v1", "b", bucket, "o", name])?;

        Ok(Self {
            client,
            tokens,
            bucket: bucket.to_string(),
            name: name.to_string(),
            holder: Uuid::new_v4().to_string(),
            upload_url,
            object_url,
            generation: Mutex::new(None),
        })
    }

    /// Identity written into lock objects created by this instance
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Creates the lock object if absent. Returns `None` when it already exists.
    async fn try_create(&self, expires_at: DateTime<Utc>) -> Result<Option<String>, LockError> {
        let mut url = self.upload_url.clone();
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", &self.name)
            .append_pair("ifGenerationMatch", "0");

        let body = serde_json::to_vec(&LockContents {
            holder: self.holder.clone(),
            expires_at,
        })
        .map_err(|e| self.corrupt(e.to_string()))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(self.tokens.token().await?)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        match response.status() {
            StatusCode::PRECONDITION_FAILED => Ok(None),
            status if status.is_success() => {
                let decoded = match response.bytes().await {
                    Ok(bytes) => serde_json::from_slice::<ObjectResource>(&bytes)
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };

                match decoded {
                    Ok(object) => Ok(Some(object.generation)),
                    // The object exists even though the response was lost
                    Err(reason) => self.recover_created(reason).await.map(Some),
                }
            }
            status => Err(self.status_error("create", status, response).await),
        }
    }

    /// Finds the generation of an object we created when the create response was unreadable
    async fn recover_created(&self, reason: String) -> Result<String, LockError> {
        log::warn!(
            "Unreadable create response for gs://{}/{} ({}), reading lock back",
            self.bucket,
            self.name,
            reason
        );

        match self.read_current().await? {
            Some((generation, contents)) if contents.holder == self.holder => Ok(generation),
            _ => Err(self.corrupt(format!("unreadable create response: {}", reason))),
        }
    }

    /// Reads the current lock object and its generation. `None` if it does not exist.
    async fn read_current(&self) -> Result<Option<(String, LockContents)>, LockError> {
        let mut url = self.object_url.clone();
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self
            .client
            .get(url)
            .bearer_auth(self.tokens.token().await?)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let generation = response
                    .headers()
                    .get(GENERATION_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| self.corrupt("missing generation header".to_string()))?;

                let bytes = response.bytes().await?;
                let contents: LockContents =
                    serde_json::from_slice(&bytes).map_err(|e| self.corrupt(e.to_string()))?;

                Ok(Some((generation, contents)))
            }
            status => Err(self.status_error("read", status, response).await),
        }
    }

    /// Deletes the lock object if it still has `generation`
    async fn delete_generation(&self, generation: &str) -> Result<(), LockError> {
        let mut url = self.object_url.clone();
        url.query_pairs_mut()
            .append_pair("ifGenerationMatch", generation);

        let response = self
            .client
            .delete(url)
            .bearer_auth(self.tokens.token().await?)
            .send()
            .await?;

        match response.status() {
            // Already gone, or replaced by a newer holder after our lease expired
            StatusCode::NOT_FOUND | StatusCode::PRECONDITION_FAILED => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(self.status_error("delete", status, response).await),
        }
    }

    fn corrupt(&self, reason: String) -> LockError {
        LockError::Corrupt {
            name: format!("gs://{}/{}", self.bucket, self.name),
            reason,
        }
    }

    async fn status_error(
        &self,
        operation: &'static str,
        status: StatusCode,
        response: reqwest::Response,
    ) -> LockError {
        LockError::Status {
            operation,
            name: format!("gs://{}/{}", self.bucket, self.name),
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl DistributedLock for GcsLock {
    async fn acquire(&self, ttl: Duration) -> Result<(), LockError> {
        let lease = chrono::Duration::from_std(ttl).map_err(|_| LockError::InvalidTtl { ttl })?;
        let mut held_until = None;

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let expires_at = Utc::now()
                .checked_add_signed(lease)
                .ok_or(LockError::InvalidTtl { ttl })?;

            if let Some(generation) = self.try_create(expires_at).await? {
                log::info!(
                    "Acquired lock gs://{}/{} (generation {})",
                    self.bucket,
                    self.name,
                    generation
                );
                *self.generation.lock().await = Some(generation);
                return Ok(());
            }

            match self.read_current().await? {
                // Released between our create and read; try again
                None => continue,
                Some((generation, contents)) => {
                    held_until = Some(contents.expires_at);
                    if contents.expires_at > Utc::now() {
                        break;
                    }

                    log::warn!(
                        "Lock gs://{}/{} held by {} expired at {}, taking over",
                        self.bucket,
                        self.name,
                        contents.holder,
                        contents.expires_at
                    );
                    self.delete_generation(&generation).await?;
                }
            }
        }

        let name = format!("gs://{}/{}", self.bucket, self.name);
        match held_until {
            Some(expires_at) => Err(LockError::Held { name, expires_at }),
            None => Err(LockError::Vanished { name }),
        }
    }

    async fn close(&self) -> Result<(), LockError> {
        let generation = self.generation.lock().await.take();

        match generation {
            Some(generation) => {
                self.delete_generation(&generation).await?;
                log::info!("Released lock gs://{}/{}", self.bucket, self.name);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn build_url(base: &Url, segments: &[&str]) -> Result<Url, url::ParseError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
