use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{Datastore, DatastoreError, TableName};
use crate::config::DatabaseConfig;
use crate::db;
use crate::models::{Checkpoint, FailureEventEntry};

/// PostgreSQL-backed [`Datastore`]
#[derive(Clone)]
pub struct PgDatastore {
    pool: PgPool,
}

impl PgDatastore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool and optionally applies the bundled migrations
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatastoreError> {
        let pool = db::create_pool(config)
            .await
            .map_err(DatastoreError::Connect)?;

        if config.run_migrations {
            db::run_migrations(&pool)
                .await
                .map_err(|e| DatastoreError::Connect(e.into()))?;
        }

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Datastore for PgDatastore {
    async fn delivery_event_exists(
        &self,
        table: &TableName,
        delivery_id: &str,
    ) -> Result<bool, DatastoreError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE delivery_id = $1)",
            table.quoted()
        );

        sqlx::query_scalar::<_, bool>(&sql)
            .bind(delivery_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatastoreError::query("check delivery event", table, e))
    }

    async fn failure_events_exceeds_retry_limit(
        &self,
        table: &TableName,
        delivery_id: &str,
        limit: u32,
    ) -> Result<bool, DatastoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE delivery_id = $1",
            table.quoted()
        );

        let count: i64 = sqlx::query_scalar(&sql)
            .bind(delivery_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatastoreError::query("count failure events", table, e))?;

        Ok(count >= i64::from(limit))
    }

    async fn write_failure_event(
        &self,
        table: &TableName,
        delivery_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), DatastoreError> {
        let sql = format!(
            r#"
            INSERT INTO {} (delivery_id, created_at)
            VALUES ($1, $2)
            RETURNING delivery_id, created_at
            "#,
            table.quoted()
        );

        let entry = sqlx::query_as::<_, FailureEventEntry>(&sql)
            .bind(delivery_id)
            .bind(created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DatastoreError::query("write failure event", table, e))?;

        log::debug!(
            "Recorded failure event for {} at {}",
            entry.delivery_id,
            entry.created_at
        );
        Ok(())
    }

    async fn retrieve_checkpoint_id(
        &self,
        table: &TableName,
        domain: &str,
    ) -> Result<String, DatastoreError> {
        // Checkpoints are append-only, the newest row wins
        let sql = format!(
            r#"
            SELECT value, domain, created_at FROM {}
            WHERE domain = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            table.quoted()
        );

        let checkpoint = sqlx::query_as::<_, Checkpoint>(&sql)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DatastoreError::query("retrieve checkpoint", table, e))?;

        Ok(checkpoint.map(|c| c.value).unwrap_or_default())
    }

    async fn write_checkpoint_id(
        &self,
        table: &TableName,
        value: &str,
        created_at: DateTime<Utc>,
        domain: &str,
    ) -> Result<(), DatastoreError> {
        let sql = format!(
            "INSERT INTO {} (value, domain, created_at) VALUES ($1, $2, $3)",
            table.quoted()
        );

        sqlx::query(&sql)
            .bind(value)
            .bind(domain)
            .bind(created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| DatastoreError::query("write checkpoint", table, e))?;

        Ok(())
    }

    async fn close(&self) -> Result<(), DatastoreError> {
        self.pool.close().await;
        Ok(())
    }
}
