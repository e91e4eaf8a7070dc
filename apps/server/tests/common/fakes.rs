//! In-memory implementations of the datastore, topic, lock and delivery feed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline::datastore::{Datastore, DatastoreError, TableName};
use hookline::github::{DeliveryPage, EventSource, GithubError};
use hookline::lock::{DistributedLock, LockError};
use hookline::models::{Checkpoint, DeliveryEvent, EventRecord, FailureEventEntry};
use hookline::publisher::{PublishError, Publisher};
use tokio::sync::Notify;
use uuid::Uuid;

// =============================================================================
// Datastore
// =============================================================================

/// Datastore operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatastoreOp {
    CheckEvent,
    CountFailures,
    WriteFailure,
    ReadCheckpoint,
    WriteCheckpoint,
}

#[derive(Default)]
struct DatastoreState {
    /// (table, delivery_id)
    events: HashSet<(String, String)>,
    failures: Vec<(String, FailureEventEntry)>,
    checkpoints: Vec<(String, Checkpoint)>,
    failing: HashSet<DatastoreOp>,
    closed: usize,
}

/// Datastore backed by process memory. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDatastore {
    state: Arc<Mutex<DatastoreState>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `delivery_id` in the events log, as the downstream consumer would
    pub fn insert_event(&self, table: &TableName, delivery_id: &str) {
        self.state
            .lock()
            .unwrap()
            .events
            .insert((table.to_string(), delivery_id.to_string()));
    }

    pub fn set_checkpoint(&self, table: &TableName, domain: &str, value: &str) {
        self.state.lock().unwrap().checkpoints.push((
            table.to_string(),
            Checkpoint {
                value: value.to_string(),
                domain: domain.to_string(),
                created_at: Utc::now(),
            },
        ));
    }

    pub fn fail(&self, op: DatastoreOp) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn failure_count(&self, delivery_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .failures
            .iter()
            .filter(|(_, entry)| entry.delivery_id == delivery_id)
            .count()
    }

    /// Checkpoint values written for `domain`, oldest first
    pub fn checkpoints(&self, domain: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .checkpoints
            .iter()
            .filter(|(_, c)| c.domain == domain)
            .map(|(_, c)| c.value.clone())
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    fn check(&self, op: DatastoreOp, table: &TableName) -> Result<(), DatastoreError> {
        if self.state.lock().unwrap().failing.contains(&op) {
            return Err(DatastoreError::Query {
                operation: "run scripted failure",
                table: table.to_string(),
                source: sqlx::Error::PoolTimedOut,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn delivery_event_exists(
        &self,
        table: &TableName,
        delivery_id: &str,
    ) -> Result<bool, DatastoreError> {
        self.check(DatastoreOp::CheckEvent, table)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .contains(&(table.to_string(), delivery_id.to_string())))
    }

    async fn failure_events_exceeds_retry_limit(
        &self,
        table: &TableName,
        delivery_id: &str,
        limit: u32,
    ) -> Result<bool, DatastoreError> {
        self.check(DatastoreOp::CountFailures, table)?;
        let table = table.to_string();
        let count = self
            .state
            .lock()
            .unwrap()
            .failures
            .iter()
            .filter(|(t, entry)| *t == table && entry.delivery_id == delivery_id)
            .count();
        Ok(count >= limit as usize)
    }

    async fn write_failure_event(
        &self,
        table: &TableName,
        delivery_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), DatastoreError> {
        self.check(DatastoreOp::WriteFailure, table)?;
        self.state.lock().unwrap().failures.push((
            table.to_string(),
            FailureEventEntry {
                delivery_id: delivery_id.to_string(),
                created_at,
            },
        ));
        Ok(())
    }

    async fn retrieve_checkpoint_id(
        &self,
        table: &TableName,
        domain: &str,
    ) -> Result<String, DatastoreError> {
        self.check(DatastoreOp::ReadCheckpoint, table)?;
        let table = table.to_string();
        Ok(self
            .state
            .lock()
            .unwrap()
            .checkpoints
            .iter()
            .rev()
            .find(|(t, c)| *t == table && c.domain == domain)
            .map(|(_, c)| c.value.clone())
            .unwrap_or_default())
    }

    async fn write_checkpoint_id(
        &self,
        table: &TableName,
        value: &str,
        created_at: DateTime<Utc>,
        domain: &str,
    ) -> Result<(), DatastoreError> {
        self.check(DatastoreOp::WriteCheckpoint, table)?;
        self.state.lock().unwrap().checkpoints.push((
            table.to_string(),
            Checkpoint {
                value: value.to_string(),
                domain: domain.to_string(),
                created_at,
            },
        ));
        Ok(())
    }

    async fn close(&self) -> Result<(), DatastoreError> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Topic that keeps every published message
pub struct RecordingPublisher {
    topic: String,
    messages: Mutex<Vec<Vec<u8>>>,
    failing: AtomicBool,
    /// Events log that published records land in
    sink: Option<(MemoryDatastore, TableName)>,
}

impl RecordingPublisher {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            messages: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            sink: None,
        }
    }

    /// Writes each published delivery into `table`, standing in for the topic consumer
    pub fn with_sink(mut self, datastore: MemoryDatastore, table: TableName) -> Self {
        self.sink = Some((datastore, table));
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| serde_json::from_slice(m).expect("published message is an EventRecord"))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, data: &[u8]) -> Result<String, PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Status {
                topic: self.topic.clone(),
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        if let Some((datastore, table)) = &self.sink {
            let record: EventRecord =
                serde_json::from_slice(data).expect("published message is an EventRecord");
            datastore.insert_event(table, &record.delivery_id);
        }

        let mut messages = self.messages.lock().unwrap();
        messages.push(data.to_vec());
        Ok(messages.len().to_string())
    }
}

// =============================================================================
// Lock
// =============================================================================

#[derive(Default)]
struct LockState {
    holder: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// Lease lock whose state can be shared between instances, one per "process"
pub struct MemoryLock {
    holder: String,
    state: Arc<Mutex<LockState>>,
    failing: AtomicBool,
    closes: AtomicUsize,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self {
            holder: Uuid::new_v4().to_string(),
            state: Arc::new(Mutex::new(LockState::default())),
            failing: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        }
    }

    /// Another contender for the same lock
    pub fn contender(&self) -> Self {
        Self {
            holder: Uuid::new_v4().to_string(),
            state: self.state.clone(),
            failing: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Whether any instance currently holds the lease
    pub fn is_taken(&self) -> bool {
        self.state.lock().unwrap().holder.is_some()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self, ttl: Duration) -> Result<(), LockError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LockError::Status {
                operation: "create",
                name: "memory://retry-lock".to_string(),
                status: 503,
                body: "backend unavailable".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        if let (Some(holder), Some(expires_at)) = (&state.holder, state.expires_at) {
            if *holder != self.holder && expires_at > Utc::now() {
                return Err(LockError::Held {
                    name: "memory://retry-lock".to_string(),
                    expires_at,
                });
            }
        }

        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|lease| Utc::now().checked_add_signed(lease))
            .ok_or(LockError::InvalidTtl { ttl })?;

        state.holder = Some(self.holder.clone());
        state.expires_at = Some(expires_at);
        Ok(())
    }

    async fn close(&self) -> Result<(), LockError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.holder.as_deref() == Some(self.holder.as_str()) {
            state.holder = None;
            state.expires_at = None;
        }
        Ok(())
    }
}

// =============================================================================
// Event source
// =============================================================================

/// Pauses `list_deliveries` until the test releases it
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Delivery feed replaying scripted pages
#[derive(Default)]
pub struct ScriptedEventSource {
    pages: HashMap<Option<String>, DeliveryPage>,
    failing_redeliveries: HashSet<i64>,
    list_delay: Option<Duration>,
    gate: Option<Gate>,
    requested: Mutex<Vec<Option<String>>>,
    attempts: Mutex<Vec<i64>>,
}

impl ScriptedEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A feed with a single page and no cursor
    pub fn single_page(deliveries: Vec<DeliveryEvent>) -> Self {
        Self::new().page(None, deliveries, None)
    }

    /// Serves `deliveries` for `cursor`, pointing at `next`
    pub fn page(
        mut self,
        cursor: Option<&str>,
        deliveries: Vec<DeliveryEvent>,
        next: Option<&str>,
    ) -> Self {
        self.pages.insert(
            cursor.map(str::to_string),
            DeliveryPage {
                deliveries,
                next_cursor: next.map(str::to_string),
            },
        );
        self
    }

    pub fn fail_redelivery(mut self, delivery_id: i64) -> Self {
        self.failing_redeliveries.insert(delivery_id);
        self
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Cursors `list_deliveries` was called with, in order
    pub fn requested_cursors(&self) -> Vec<Option<String>> {
        self.requested.lock().unwrap().clone()
    }

    /// Delivery ids redelivery was attempted for, in order
    pub fn redelivery_attempts(&self) -> Vec<i64> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for ScriptedEventSource {
    async fn list_deliveries(&self, cursor: Option<&str>) -> Result<DeliveryPage, GithubError> {
        self.requested
            .lock()
            .unwrap()
            .push(cursor.map(str::to_string));

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }

        Ok(self
            .pages
            .get(&cursor.map(str::to_string))
            .cloned()
            .unwrap_or_default())
    }

    async fn redeliver_event(&self, delivery_id: i64) -> Result<(), GithubError> {
        self.attempts.lock().unwrap().push(delivery_id);

        if self.failing_redeliveries.contains(&delivery_id) {
            return Err(GithubError::Status {
                operation: "redeliver",
                status: 422,
                body: "Validation Failed".to_string(),
            });
        }
        Ok(())
    }
}
