//! GitHub webhook delivery history, read through the App API.

pub mod client;

use async_trait::async_trait;

use crate::auth::AppAuthError;
use crate::models::DeliveryEvent;

pub use client::{parse_next_cursor, GithubClient};

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error(transparent)]
    Auth(#[from] AppAuthError),

    #[error("GitHub request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid GitHub API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("GitHub {operation} returned HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
}

/// One page of deliveries, newest first
#[derive(Debug, Clone, Default)]
pub struct DeliveryPage {
    pub deliveries: Vec<DeliveryEvent>,
    /// Cursor for the next (older) page, absent on the last page
    pub next_cursor: Option<String>,
}

/// Paginated feed of past webhook deliveries
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Lists one page of deliveries, starting at `cursor` or at the newest delivery
    async fn list_deliveries(&self, cursor: Option<&str>) -> Result<DeliveryPage, GithubError>;

    /// Asks GitHub to send delivery `delivery_id` again.
    ///
    /// GitHub accepts the request asynchronously (`202 Accepted`), which counts as success.
    async fn redeliver_event(&self, delivery_id: i64) -> Result<(), GithubError>;
}
