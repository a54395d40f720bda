//! Sync orchestrator: the externally-triggered drain façade.
//!
//! Invoked on connectivity-restore and on manual "sync now" actions. Unlike
//! the raw queue drain, the orchestrator classifies terminal outcomes by
//! status code (409 conflicts are never retried), consults the per-endpoint
//! circuit breaker before each call, and records every attempt in the error
//! metrics. Worker lifecycle is explicit: join handles are tracked and
//! cancellation goes through a token.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use waypoint_common::resilience::error_metrics::TRANSPORT_ERROR_STATUS;
use waypoint_common::resilience::{Clock, ErrorMetrics, SystemClock};
use waypoint_domain::constants::DEFAULT_MAX_RETRIES;
use waypoint_domain::{ApiError, QueueItem, QueueItemState, Result, SyncResult};

use super::plan::{sort_for_drain, split_expired, DependencyGate};
use super::ports::{ConnectivityMonitor, QueueStore, Transport};

/// Prefix recorded on conflict failures so retry paths can recognize them.
const CONFLICT_PREFIX: &str = "conflict: ";

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Per-item retry budget
    pub max_retries: u32,
    /// Join timeout when stopping the connectivity trigger task
    pub join_timeout: std::time::Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_retries: DEFAULT_MAX_RETRIES, join_timeout: std::time::Duration::from_secs(5) }
    }
}

/// Sync orchestrator over the queue store, transport, connectivity signal,
/// and error metrics.
pub struct SyncOrchestrator<C: Clock = SystemClock> {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    metrics: Arc<ErrorMetrics<C>>,
    config: SyncConfig,
    processing: Arc<AtomicBool>,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl<C: Clock> SyncOrchestrator<C> {
    /// Create a new orchestrator.
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        metrics: Arc<ErrorMetrics<C>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            transport,
            connectivity,
            metrics,
            config,
            processing: Arc::new(AtomicBool::new(false)),
            cancellation: CancellationToken::new(),
            task_handle: None,
        }
    }

    /// Run one full sync pass.
    ///
    /// Returns a skipped result without touching the network when offline or
    /// when another pass is already running.
    #[instrument(skip(self))]
    pub async fn sync_now(&self) -> Result<SyncResult> {
        if !self.connectivity.is_online() {
            debug!("Skipping sync: offline");
            return Ok(SyncResult::skipped("offline"));
        }

        if self
            .processing
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_err()
        {
            debug!("Skipping sync: already in progress");
            return Ok(SyncResult::skipped("sync already in progress"));
        }

        let result = self.run_pass().await;
        self.processing.store(false, AtomicOrdering::SeqCst);
        result
    }

    /// One classification-aware drain pass.
    async fn run_pass(&self) -> Result<SyncResult> {
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
        let mut failed = 0_usize;
        let mut skipped = 0_usize;

        for mut item in live {
            if gate.blocks(&item) {
                debug!(queue_id = item.id, depends_on = ?item.depends_on, "Skipping item with unmet dependency");
                skipped += 1;
                continue;
            }

            if !item.can_retry(self.config.max_retries) {
                warn!(queue_id = item.id, retry_count = item.retry_count, "Purging item over retry budget");
                item.mark_failed("retry budget exhausted");
                self.store.update(&item).await?;
                failed += 1;
                continue;
            }

            let endpoint = item.request.endpoint().to_string();
            if self.metrics.is_circuit_open(&endpoint) {
                debug!(queue_id = item.id, %endpoint, "Skipping item: circuit open");
                skipped += 1;
                continue;
            }

            if self.execute_item(&mut item, &endpoint).await? {
                processed += 1;
                gate.release(&item.entity_id);
            } else {
                failed += 1;
            }
        }

        let result = SyncResult {
            success: failed == 0,
            processed_count: processed,
            failed_count: failed,
            message: format!("processed {processed}, failed {failed}, skipped {skipped}"),
        };
        info!(processed, failed, skipped, "Sync pass completed");
        Ok(result)
    }

    /// Execute one item with status-code classification, returning whether
    /// it completed.
    async fn execute_item(&self, item: &mut QueueItem, endpoint: &str) -> Result<bool> {
        item.mark_syncing();
        self.store.update(item).await?;

        match self.transport.execute(&item.request).await {
            Ok(response) if response.is_success() => {
                self.metrics.record_success(endpoint);
                item.mark_completed();
                self.store.update(item).await?;
                debug!(queue_id = item.id, "Item completed");
                Ok(true)
            }
            Ok(response) if response.status == 409 => {
                // Business-level divergence: terminal, never blindly retried.
                self.metrics.record_request(endpoint);
                self.metrics.record_error(endpoint, response.status);
                item.mark_failed(format!("{CONFLICT_PREFIX}{}", response.error_message()));
                self.store.update(item).await?;
                warn!(queue_id = item.id, "Item failed with conflict; manual resolution required");
                Ok(false)
            }
            Ok(response) => {
                self.metrics.record_request(endpoint);
                self.metrics.record_error(endpoint, response.status);
                item.mark_retry(response.error_message());
                self.store.update(item).await?;
                debug!(queue_id = item.id, status = response.status, "Item failed, eligible for retry");
                Ok(false)
            }
            Err(e) => {
                self.metrics.record_request(endpoint);
                self.metrics.record_error(endpoint, TRANSPORT_ERROR_STATUS);
                item.mark_retry(e.to_string());
                self.store.update(item).await?;
                debug!(queue_id = item.id, error = %e, "Item failed at transport, eligible for retry");
                Ok(false)
            }
        }
    }

    /// Re-promote failed items with remaining retry budget back to pending
    /// and run a sync pass.
    ///
    /// Conflict failures are deliberately left terminal: re-sending diverged
    /// state cannot succeed without manual resolution.
    pub async fn retry_failed_operations(&self) -> Result<SyncResult> {
        let failed = self.store.load_by_state(QueueItemState::Failed).await?;
        let mut promoted = 0_usize;

        for mut item in failed {
            let is_conflict =
                item.last_error.as_deref().is_some_and(|e| e.starts_with(CONFLICT_PREFIX));
            if is_conflict || !item.can_retry(self.config.max_retries) {
                continue;
            }
            item.state = QueueItemState::Pending;
            self.store.update(&item).await?;
            promoted += 1;
        }

        info!(promoted, "Re-promoted failed items");
        self.sync_now().await
    }

    /// Delete terminal items older than the given age, for storage hygiene.
    pub async fn cleanup_completed_operations(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(older_than_days));
        let purged = self.store.purge_terminal_older_than(cutoff).await?;
        info!(purged, older_than_days, "Cleaned up terminal queue items");
        Ok(purged)
    }

    /// Whether the connectivity trigger task is active.
    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Start the connectivity trigger: a background task that runs a sync
    /// pass on every offline-to-online transition.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(ApiError::Internal("sync trigger already running".into()));
        }

        info!("Starting sync trigger");
        self.cancellation = CancellationToken::new();

        let worker = self.clone();
        let cancel = self.cancellation.clone();
        let handle = tokio::spawn(async move {
            worker.trigger_loop(cancel).await;
        });

        self.task_handle = Some(handle);
        Ok(())
    }

    /// Stop the connectivity trigger and wait for the task to finish.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Err(ApiError::Internal("sync trigger not running".into()));
        }

        info!("Stopping sync trigger");
        self.cancellation.cancel();

        if let Some(handle) = self.task_handle.take() {
            match tokio::time::timeout(self.config.join_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Sync trigger task panicked");
                    return Err(ApiError::Internal("sync trigger task panicked".into()));
                }
                Err(_) => {
                    warn!("Sync trigger task did not stop within timeout");
                    return Err(ApiError::Internal("sync trigger join timeout".into()));
                }
            }
        }

        self.cancellation = CancellationToken::new();
        info!("Sync trigger stopped");
        Ok(())
    }

    /// Background loop reacting to connectivity transitions.
    async fn trigger_loop(&self, cancel: CancellationToken) {
        let mut rx = self.connectivity.subscribe();
        let mut was_online = *rx.borrow();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Sync trigger loop cancelled");
                    break;
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity channel closed; stopping trigger loop");
                        break;
                    }
                    let online = *rx.borrow();
                    if online && !was_online {
                        info!("Connectivity restored; starting sync pass");
                        if let Err(e) = self.sync_now().await {
                            warn!(error = %e, "Connectivity-triggered sync failed");
                        }
                    }
                    was_online = online;
                }
            }
        }
    }
}

impl<C: Clock> Clone for SyncOrchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            transport: self.transport.clone(),
            connectivity: self.connectivity.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            processing: self.processing.clone(),
            cancellation: self.cancellation.clone(),
            task_handle: None,
        }
    }
}

impl<C: Clock> Drop for SyncOrchestrator<C> {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("SyncOrchestrator dropped while running; cancelling trigger task");
            self.cancellation.cancel();
        }
    }
}
