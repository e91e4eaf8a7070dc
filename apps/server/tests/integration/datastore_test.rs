//! Integration tests for the PostgreSQL datastore
//!
//! Each test runs against a fresh PostgreSQL container with migrations applied.

use chrono::{Duration, Utc};
use hookline::datastore::Datastore;
use hookline::models::{Checkpoint, FailureEventEntry};
use pretty_assertions::assert_eq;

use crate::common::{table, TestDb};

async fn insert_event(db: &TestDb, delivery_id: &str) {
    sqlx::query(
        "INSERT INTO events (delivery_id, signature, received, event, payload) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(delivery_id)
    .bind("sha256=00")
    .bind(Utc::now())
    .bind("push")
    .bind(r#"{"a":1}"#)
    .execute(&db.pool)
    .await
    .expect("Failed to insert event");
}

// =============================================================================
// Events log
// =============================================================================

#[tokio::test]
async fn test_delivery_event_exists() {
    let db = TestDb::new().await;
    let store = db.datastore();
    let events = table("events");

    assert!(!store.delivery_event_exists(&events, "d-1").await.unwrap());

    insert_event(&db, "d-1").await;

    assert!(store.delivery_event_exists(&events, "d-1").await.unwrap());
    assert!(!store.delivery_event_exists(&events, "d-2").await.unwrap());
}

#[tokio::test]
async fn test_missing_table_is_query_error() {
    let db = TestDb::new().await;
    let store = db.datastore();

    let err = store
        .delivery_event_exists(&table("no_such_table"), "d-1")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("no_such_table"));
}

// =============================================================================
// Failure events
// =============================================================================

#[tokio::test]
async fn test_failure_events_count_against_limit() {
    let db = TestDb::new().await;
    let store = db.datastore();
    let failures = table("failure_events");

    assert!(!store
        .failure_events_exceeds_retry_limit(&failures, "d-1", 2)
        .await
        .unwrap());

    store
        .write_failure_event(&failures, "d-1", Utc::now())
        .await
        .unwrap();
    assert!(!store
        .failure_events_exceeds_retry_limit(&failures, "d-1", 2)
        .await
        .unwrap());

    store
        .write_failure_event(&failures, "d-1", Utc::now())
        .await
        .unwrap();
    assert!(store
        .failure_events_exceeds_retry_limit(&failures, "d-1", 2)
        .await
        .unwrap());

    // Other deliveries are unaffected
    assert!(!store
        .failure_events_exceeds_retry_limit(&failures, "d-2", 2)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_failure_event_rows() {
    let db = TestDb::new().await;
    let store = db.datastore();
    let created_at = Utc::now();

    store
        .write_failure_event(&table("failure_events"), "d-1", created_at)
        .await
        .unwrap();

    let rows: Vec<FailureEventEntry> =
        sqlx::query_as("SELECT delivery_id, created_at FROM failure_events")
            .fetch_all(&db.pool)
            .await
            .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].delivery_id, "d-1");
    assert_eq!(
        rows[0].created_at.timestamp_micros(),
        created_at.timestamp_micros()
    );
}

// =============================================================================
// Checkpoints
// =============================================================================

#[tokio::test]
async fn test_missing_checkpoint_is_empty() {
    let db = TestDb::new().await;
    let store = db.datastore();

    let value = store
        .retrieve_checkpoint_id(&table("checkpoint"), "github.com")
        .await
        .unwrap();

    assert_eq!(value, "");
}

#[tokio::test]
async fn test_latest_checkpoint_wins() {
    let db = TestDb::new().await;
    let store = db.datastore();
    let checkpoints = table("checkpoint");
    let now = Utc::now();

    store
        .write_checkpoint_id(&checkpoints, "100", now - Duration::minutes(10), "github.com")
        .await
        .unwrap();
    store
        .write_checkpoint_id(&checkpoints, "250", now, "github.com")
        .await
        .unwrap();
    store
        .write_checkpoint_id(&checkpoints, "175", now - Duration::minutes(5), "github.com")
        .await
        .unwrap();

    let value = store
        .retrieve_checkpoint_id(&checkpoints, "github.com")
        .await
        .unwrap();
    assert_eq!(value, "250");

    // Rows are appended, never updated
    let rows: Vec<Checkpoint> =
        sqlx::query_as("SELECT value, domain, created_at FROM checkpoint ORDER BY created_at")
            .fetch_all(&db.pool)
            .await
            .unwrap();
    let values: Vec<&str> = rows.iter().map(|r| r.value.as_str()).collect();
    assert_eq!(values, vec!["100", "175", "250"]);
}

#[tokio::test]
async fn test_checkpoints_are_scoped_by_domain() {
    let db = TestDb::new().await;
    let store = db.datastore();
    let checkpoints = table("checkpoint");

    store
        .write_checkpoint_id(&checkpoints, "42", Utc::now(), "github.example.com")
        .await
        .unwrap();

    assert_eq!(
        store
            .retrieve_checkpoint_id(&checkpoints, "github.com")
            .await
            .unwrap(),
        ""
    );
    assert_eq!(
        store
            .retrieve_checkpoint_id(&checkpoints, "github.example.com")
            .await
            .unwrap(),
        "42"
    );
}

#[tokio::test]
async fn test_schema_qualified_table() {
    let db = TestDb::new().await;
    let store = db.datastore();

    sqlx::query("CREATE SCHEMA github")
        .execute(&db.pool)
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE github.checkpoint (value TEXT NOT NULL, domain TEXT NOT NULL, created_at TIMESTAMPTZ NOT NULL)",
    )
    .execute(&db.pool)
    .await
    .unwrap();

    let qualified = table("github.checkpoint");
    store
        .write_checkpoint_id(&qualified, "7", Utc::now(), "github.com")
        .await
        .unwrap();

    assert_eq!(
        store
            .retrieve_checkpoint_id(&qualified, "github.com")
            .await
            .unwrap(),
        "7"
    );
    // The default table is untouched
    assert_eq!(
        store
            .retrieve_checkpoint_id(&table("checkpoint"), "github.com")
            .await
            .unwrap(),
        ""
    );
}

#[tokio::test]
async fn test_close_releases_pool() {
    let db = TestDb::new().await;
    let store = db.datastore();

    store.close().await.unwrap();

    assert!(store.pool().is_closed());
}
