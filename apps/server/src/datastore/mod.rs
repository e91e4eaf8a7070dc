//! Durable storage consumed by the webhook ingress and the retry job.
//!
//! The [`Datastore`] trait is the only thing the ingestion and reconciliation
//! logic depends on; [`PgDatastore`] is the production implementation.
//! Implementations never retry internally, callers own the retry policy.

pub mod postgres;
pub mod table;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use postgres::PgDatastore;
pub use table::{InvalidTableName, TableName};

/// Errors returned by a [`Datastore`]
#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    #[error("failed to {operation} in {table}: {source}")]
    Query {
        operation: &'static str,
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to connect to datastore: {0}")]
    Connect(#[source] sqlx::Error),
}

impl DatastoreError {
    pub(crate) fn query(operation: &'static str, table: &TableName, source: sqlx::Error) -> Self {
        DatastoreError::Query {
            operation,
            table: table.to_string(),
            source,
        }
    }
}

/// Append-only event, failure and checkpoint storage
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Whether the events log already holds a row for `delivery_id`
    async fn delivery_event_exists(
        &self,
        table: &TableName,
        delivery_id: &str,
    ) -> Result<bool, DatastoreError>;

    /// Whether the recorded publish failures for `delivery_id` have reached `limit`
    async fn failure_events_exceeds_retry_limit(
        &self,
        table: &TableName,
        delivery_id: &str,
        limit: u32,
    ) -> Result<bool, DatastoreError>;

    /// Appends a failure entry for `delivery_id`
    async fn write_failure_event(
        &self,
        table: &TableName,
        delivery_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), DatastoreError>;

    /// Most recently written checkpoint for `domain`, or an empty string if none exists
    async fn retrieve_checkpoint_id(
        &self,
        table: &TableName,
        domain: &str,
    ) -> Result<String, DatastoreError>;

    /// Appends a new checkpoint row for `domain`
    async fn write_checkpoint_id(
        &self,
        table: &TableName,
        value: &str,
        created_at: DateTime<Utc>,
        domain: &str,
    ) -> Result<(), DatastoreError>;

    /// Releases the underlying connections
    async fn close(&self) -> Result<(), DatastoreError>;
}
