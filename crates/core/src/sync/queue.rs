//! Durable offline request queue.
//!
//! Queues mutating requests made while disconnected or during transient
//! failures and replays them against the transport. Ordering is priority
//! descending with FIFO inside a band; items carry a TTL and an optional
//! dependency on another entity. The drain is explicitly non-reentrant:
//! concurrent triggers collapse into one active pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use waypoint_domain::constants::{DEFAULT_ITEM_TTL, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RETRIES};
use waypoint_domain::{
    ApiError, Operation, Priority, QueueItem, QueueItemState, QueueStats, QueuedRequest, Result,
};

use super::plan::{sort_for_drain, split_expired, DependencyGate};
use super::ports::{ConnectivityMonitor, QueueStore, Transport};

/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of non-terminal items accepted
    pub max_size: usize,
    /// Per-item retry budget
    pub max_retries: u32,
    /// TTL applied when the caller does not provide one
    pub default_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_QUEUE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            default_ttl: DEFAULT_ITEM_TTL,
        }
    }
}

impl QueueConfig {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_size == 0 {
            return Err("Max queue size must be greater than 0".to_string());
        }
        if self.max_retries == 0 {
            return Err("Max retries must be greater than 0".to_string());
        }
        if self.default_ttl.is_zero() {
            return Err("Default TTL must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Offline request queue service
///
/// Constructed once at startup and passed by handle to all consumers; there
/// is no global queue instance.
pub struct OfflineQueue {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    config: QueueConfig,
    processing: Arc<AtomicBool>,
}

impl OfflineQueue {
    /// Create a new queue over the given ports.
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        config: QueueConfig,
    ) -> Result<Self> {
        config.validate().map_err(ApiError::Validation)?;
        Ok(Self {
            store,
            transport,
            connectivity,
            config,
            processing: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Enqueue a mutating request for later replay.
    ///
    /// Returns the store-assigned queue id. Fails synchronously with
    /// [`ApiError::QueueFull`] once the non-terminal item count reaches the
    /// configured cap, and with [`ApiError::Validation`] for malformed
    /// requests — these are the only failures the caller of a queued
    /// mutation observes.
    #[instrument(skip_all, fields(path = %request.path, %priority))]
    pub async fn enqueue(
        &self,
        entity_id: impl Into<String>,
        operation: Operation,
        request: QueuedRequest,
        priority: Priority,
        ttl: Option<Duration>,
        depends_on: Option<String>,
    ) -> Result<i64> {
        request.validate().map_err(ApiError::Validation)?;

        let active = self.store.count_active().await?;
        if active >= self.config.max_size {
            warn!(active, capacity = self.config.max_size, "Offline queue at capacity");
            return Err(ApiError::QueueFull { capacity: self.config.max_size });
        }

        let mut item = QueueItem::new(
            entity_id,
            operation,
            request,
            priority,
            ttl.unwrap_or(self.config.default_ttl),
            Utc::now(),
        );
        if let Some(dep) = depends_on {
            item = item.with_depends_on(dep);
        }

        let id = self.store.insert(&item).await?;
        debug!(queue_id = id, entity_type = %item.entity_type, "Request enqueued");
        Ok(id)
    }

    /// Drain the queue once, returning the number of items completed.
    ///
    /// Returns 0 without touching the network when offline or when another
    /// drain is already in progress (overlapping triggers collapse into one
    /// active pass).
    #[instrument(skip(self))]
    pub async fn process_queue(&self) -> Result<usize> {
        if !self.connectivity.is_online() {
            debug!("Skipping queue drain: offline");
            return Ok(0);
        }

        if self
            .processing
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_err()
        {
            debug!("Skipping queue drain: already in progress");
            return Ok(0);
        }

        let result = self.drain().await;
        self.processing.store(false, AtomicOrdering::SeqCst);
        result
    }

    /// One full drain pass over the pending items.
    async fn drain(&self) -> Result<usize> {
        let now = Utc::now();
        let pending: Vec<QueueItem> = self
            .store
            .load_active()
            .await?
            .into_iter()
            .filter(|item| item.state == QueueItemState::Pending)
            .collect();

        let (mut live, expired) = split_expired(pending, now);
        for item in &expired {
            warn!(queue_id = item.id, entity_type = %item.entity_type, "Purging expired item");
            self.store.delete(item.id).await?;
        }

        sort_for_drain(&mut live);
        let mut gate = DependencyGate::new(&live);

        let mut processed = 0_usize;
        for mut item in live {
            if gate.blocks(&item) {
                debug!(queue_id = item.id, depends_on = ?item.depends_on, "Skipping item with unmet dependency");
                continue;
            }

            if !item.can_retry(self.config.max_retries) {
                warn!(queue_id = item.id, retry_count = item.retry_count, "Purging item over retry budget");
                item.mark_failed("retry budget exhausted");
                self.store.update(&item).await?;
                continue;
            }

            if self.execute_item(&mut item).await? {
                processed += 1;
                gate.release(&item.entity_id);
            }
        }

        if processed > 0 {
            info!(processed, "Queue drain completed");
        }
        Ok(processed)
    }

    /// Execute one item, returning whether it completed.
    ///
    /// The queue does not special-case HTTP status codes beyond
    /// success/failure; conflict classification belongs to the sync
    /// orchestrator.
    async fn execute_item(&self, item: &mut QueueItem) -> Result<bool> {
        item.mark_syncing();
        self.store.update(item).await?;

        match self.transport.execute(&item.request).await {
            Ok(response) if response.is_success() => {
                item.mark_completed();
                self.store.update(item).await?;
                debug!(queue_id = item.id, "Item completed");
                Ok(true)
            }
            Ok(response) => {
                item.mark_retry(response.error_message());
                self.store.update(item).await?;
                debug!(queue_id = item.id, status = response.status, retry_count = item.retry_count, "Item failed, returned to pending");
                Ok(false)
            }
            Err(e) => {
                item.mark_retry(e.to_string());
                self.store.update(item).await?;
                debug!(queue_id = item.id, error = %e, retry_count = item.retry_count, "Item failed at transport, returned to pending");
                Ok(false)
            }
        }
    }

    /// Remove every item from the queue.
    pub async fn clear_queue(&self) -> Result<usize> {
        let count = self.store.clear().await?;
        info!(count, "Offline queue cleared");
        Ok(count)
    }

    /// Snapshot of queue composition.
    pub async fn stats(&self) -> Result<QueueStats> {
        let now = Utc::now();
        let active = self.store.load_active().await?;

        let mut per_priority: HashMap<Priority, usize> = HashMap::new();
        let mut expired = 0_usize;
        let mut total_pending = 0_usize;

        for item in &active {
            if item.state == QueueItemState::Pending {
                total_pending += 1;
                *per_priority.entry(item.priority).or_insert(0) += 1;
                if item.is_expired(now) {
                    expired += 1;
                }
            }
        }

        Ok(QueueStats { total_pending, per_priority, expired })
    }
}
