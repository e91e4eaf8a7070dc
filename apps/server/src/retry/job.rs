//! Delivery reconciliation pass.
//!
//! One pass, under the distributed lock:
//!
//! 1. read the previous checkpoint for the domain,
//! 2. page through deliveries newest-first until the checkpoint (or the end),
//!    collecting every delivery that was not answered with a 2xx,
//! 3. redeliver the collected failures oldest-first,
//! 4. write the newest delivery id seen as the new checkpoint.
//!
//! If a failure cannot be resolved, the id of the last failure that was
//! resolved is written as a checkpoint before the error is returned, so the
//! next pass resumes from there instead of from the previous checkpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use super::RetryError;
use crate::datastore::{Datastore, TableName};
use crate::github::EventSource;
use crate::lock::{DistributedLock, LockError, MAX_LOCK_TTL};
use crate::models::DeliveryEvent;

/// Settings for one reconciliation pass
#[derive(Debug, Clone)]
pub struct RetryJobSettings {
    /// Checkpoint scoping key
    pub domain: String,
    pub checkpoint_table: TableName,
    pub events_table: TableName,
    pub lock_ttl: Duration,
    pub lock_ttl_clock_skew: Duration,
}

impl RetryJobSettings {
    /// Time the pass may spend after acquiring the lock
    pub fn effective_deadline(&self) -> Duration {
        self.lock_ttl.saturating_sub(self.lock_ttl_clock_skew)
    }
}

/// Counters reported at the end of a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    /// Another execution held the lock, nothing was done
    pub skipped: bool,
    /// Deliveries examined above the previous checkpoint
    pub total_event_count: usize,
    /// Deliveries that were not answered with a 2xx
    pub failed_event_count: usize,
    /// Failures resolved by redelivery (or found already recorded)
    pub redelivered_count: usize,
    /// Checkpoint written at the end of the pass
    pub checkpoint: Option<String>,
}

impl JobSummary {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Deliveries collected while paging
#[derive(Debug, Default)]
struct Scan {
    /// Id of the first delivery of the first page
    first_checkpoint: Option<String>,
    /// Failures in discovery order (newest first)
    failed: Vec<DeliveryEvent>,
    total: usize,
}

pub struct RetryJob {
    settings: RetryJobSettings,
    datastore: Arc<dyn Datastore>,
    lock: Arc<dyn DistributedLock>,
    source: Arc<dyn EventSource>,
}

impl RetryJob {
    pub fn new(
        settings: RetryJobSettings,
        datastore: Arc<dyn Datastore>,
        lock: Arc<dyn DistributedLock>,
        source: Arc<dyn EventSource>,
    ) -> Self {
        Self {
            settings,
            datastore,
            lock,
            source,
        }
    }

    /// Runs one pass, then releases the lock and closes the datastore whatever the outcome
    pub async fn execute(&self) -> Result<JobSummary, RetryError> {
        let outcome = self.execute_locked().await;

        if let Err(e) = self.lock.close().await {
            log::error!("Failed to release retry lock: {}", e);
        }
        if let Err(e) = self.datastore.close().await {
            log::error!("Failed to close datastore: {}", e);
        }

        outcome
    }

    async fn execute_locked(&self) -> Result<JobSummary, RetryError> {
        let invalid_ttl = || RetryError::InvalidLockTtl {
            ttl: self.settings.lock_ttl,
            max: MAX_LOCK_TTL,
        };
        if self.settings.lock_ttl > MAX_LOCK_TTL {
            return Err(invalid_ttl());
        }

        match self.lock.acquire(self.settings.lock_ttl).await {
            Ok(()) => {}
            Err(LockError::Held { name, expires_at }) => {
                log::info!(
                    "Lock {} is held by another execution until {}, skipping",
                    name,
                    expires_at
                );
                return Ok(JobSummary::skipped());
            }
            Err(e) => return Err(RetryError::AcquireLock(e)),
        }

        let deadline = Instant::now()
            .checked_add(self.settings.effective_deadline())
            .ok_or_else(invalid_ttl)?;
        let summary = self.reconcile(deadline).await?;

        log::info!(
            "Retry pass for {} complete: {} events scanned, {} failed, {} redelivered",
            self.settings.domain,
            summary.total_event_count,
            summary.failed_event_count,
            summary.redelivered_count
        );

        Ok(summary)
    }

    async fn reconcile(&self, deadline: Instant) -> Result<JobSummary, RetryError> {
        let prev_checkpoint = self
            .within(deadline, async {
                self.datastore
                    .retrieve_checkpoint_id(&self.settings.checkpoint_table, &self.settings.domain)
                    .await
                    .map_err(RetryError::ReadCheckpoint)
            })
            .await?;

        let prev_checkpoint = Some(prev_checkpoint).filter(|c| !c.is_empty());
        match &prev_checkpoint {
            Some(checkpoint) => log::info!("Resuming from checkpoint {}", checkpoint),
            None => log::info!("No checkpoint for {}, scanning all deliveries", self.settings.domain),
        }

        let scan = self.scan(deadline, prev_checkpoint.as_deref()).await?;

        // Oldest failure first, so the checkpoint only ever moves past resolved failures
        let mut new_checkpoint: Option<String> = None;
        let mut redelivered_count = 0;
        for event in scan.failed.iter().rev() {
            if let Err(e) = self.resolve_failure(deadline, event).await {
                self.flush_checkpoint(new_checkpoint.as_deref()).await;
                return Err(e);
            }
            redelivered_count += 1;
            new_checkpoint = Some(event.checkpoint_value());
        }

        match &scan.first_checkpoint {
            None => {
                log::warn!("No deliveries observed, checkpoint not advanced");
            }
            Some(checkpoint) => {
                self.within(deadline, async {
                    self.datastore
                        .write_checkpoint_id(
                            &self.settings.checkpoint_table,
                            checkpoint,
                            Utc::now(),
                            &self.settings.domain,
                        )
                        .await
                        .map_err(RetryError::WriteCheckpoint)
                })
                .await?;
                log::info!("Checkpoint advanced to {}", checkpoint);
            }
        }

        Ok(JobSummary {
            skipped: false,
            total_event_count: scan.total,
            failed_event_count: scan.failed.len(),
            redelivered_count,
            checkpoint: scan.first_checkpoint,
        })
    }

    /// Pages newest-first until the previous checkpoint, an empty page, or the last page
    async fn scan(
        &self,
        deadline: Instant,
        prev_checkpoint: Option<&str>,
    ) -> Result<Scan, RetryError> {
        let mut scan = Scan::default();
        let mut cursor: Option<String> = None;

        'pages: loop {
            let page = self
                .within(deadline, async {
                    self.source
                        .list_deliveries(cursor.as_deref())
                        .await
                        .map_err(|source| RetryError::ListDeliveries {
                            cursor: cursor.clone(),
                            source,
                        })
                })
                .await?;

            if page.deliveries.is_empty() {
                break;
            }

            for event in page.deliveries {
                let value = event.checkpoint_value();
                if scan.first_checkpoint.is_none() {
                    scan.first_checkpoint = Some(value.clone());
                }

                if prev_checkpoint == Some(value.as_str()) {
                    log::debug!("Reached previous checkpoint {}", value);
                    break 'pages;
                }

                scan.total += 1;
                if event.succeeded() {
                    continue;
                }
                scan.failed.push(event);
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(scan)
    }

    /// Redelivers one failed delivery, falling back to the events log when redelivery fails
    async fn resolve_failure(
        &self,
        deadline: Instant,
        event: &DeliveryEvent,
    ) -> Result<(), RetryError> {
        let redelivery = self
            .within(deadline, async {
                Ok(self.source.redeliver_event(event.id).await)
            })
            .await?;

        let redeliver_error = match redelivery {
            Ok(()) => {
                log::info!("Requested redelivery of {} ({})", event.id, event.guid);
                return Ok(());
            }
            Err(e) => e,
        };

        log::warn!(
            "Redelivery of {} ({}) failed: {}, checking events log",
            event.id,
            event.guid,
            redeliver_error
        );

        let exists = self
            .within(deadline, async {
                self.datastore
                    .delivery_event_exists(&self.settings.events_table, &event.guid)
                    .await
                    .map_err(|source| RetryError::ExistenceCheck {
                        guid: event.guid.clone(),
                        source,
                    })
            })
            .await?;

        if exists {
            log::info!("Delivery {} is already in the events log", event.guid);
            Ok(())
        } else {
            Err(RetryError::Redeliver {
                delivery_id: event.id,
                guid: event.guid.clone(),
                source: redeliver_error,
            })
        }
    }

    /// Best-effort write of partial progress before an error is returned.
    ///
    /// A failed write is only logged; the original error is what the caller sees.
    async fn flush_checkpoint(&self, checkpoint: Option<&str>) {
        let Some(checkpoint) = checkpoint else {
            return;
        };

        match self
            .datastore
            .write_checkpoint_id(
                &self.settings.checkpoint_table,
                checkpoint,
                Utc::now(),
                &self.settings.domain,
            )
            .await
        {
            Ok(()) => log::info!("Saved partial progress at checkpoint {}", checkpoint),
            Err(e) => log::error!("Failed to save partial checkpoint {}: {}", checkpoint, e),
        }
    }

    /// Fails with [`RetryError::DeadlineExceeded`] if `fut` does not finish before `deadline`
    async fn within<T, F>(&self, deadline: Instant, fut: F) -> Result<T, RetryError>
    where
        F: Future<Output = Result<T, RetryError>>,
    {
        tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| RetryError::DeadlineExceeded {
                limit: self.settings.effective_deadline(),
            })?
    }
}
