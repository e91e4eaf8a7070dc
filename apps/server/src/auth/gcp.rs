//! Google Cloud access tokens for Pub/Sub and Cloud Storage.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::GcpConfig;

/// Tokens are refreshed this long before the metadata server says they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum GcpAuthError {
    #[error("metadata server request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metadata server returned HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Supplies bearer tokens for Google APIs
pub struct GcpTokenSource {
    client: reqwest::Client,
    static_token: Option<String>,
    metadata_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl GcpTokenSource {
    pub fn new(client: reqwest::Client, config: &GcpConfig) -> Self {
        Self {
            client,
            static_token: config.access_token.clone(),
            metadata_url: config.metadata_url.clone(),
            cached: Mutex::new(None),
        }
    }

    /// Token source that always returns the same token
    pub fn fixed(client: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            client,
            static_token: Some(token.into()),
            metadata_url: String::new(),
            cached: Mutex::new(None),
        }
    }

    /// Returns a bearer token, fetching a new one from the metadata server when needed
    pub async fn token(&self) -> Result<String, GcpAuthError> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(existing) = cached.as_ref() {
            if Instant::now() < existing.expires_at {
                return Ok(existing.token.clone());
            }
        }

        let response = self
            .client
            .get(&self.metadata_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GcpAuthError::Status(response.status().as_u16()));
        }

        let fetched: MetadataToken = response.json().await?;
        let lifetime = Duration::from_secs(fetched.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            token: fetched.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(fetched.access_token)
    }
}
