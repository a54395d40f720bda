//! Test doubles for the sync ports.
//!
//! In-memory implementations used by service-level tests in this crate and
//! by adapter integration tests downstream. Not wired into any production
//! path.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use waypoint_domain::{
    ApiError, QueueItem, QueueItemState, QueuedRequest, Result, TransportResponse,
};

use crate::sync::ports::{ConnectivityMonitor, QueueStore, Transport};

/// In-memory queue store keyed by store-assigned id.
///
/// Iteration order over the `BTreeMap` is id order, which matches the
/// "ordered by insertion" contract of the port.
pub struct MemoryQueueStore {
    items: Mutex<BTreeMap<i64, QueueItem>>,
    next_id: AtomicI64,
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self { items: Mutex::new(BTreeMap::new()), next_id: AtomicI64::new(1) }
    }

    /// Insert an item preserving its caller-set fields (timestamps, retry
    /// counts), for seeding test fixtures.
    pub fn seed(&self, mut item: QueueItem) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        item.id = id;
        self.items.lock().unwrap().insert(id, item);
        id
    }

    /// Current copy of an item, if present.
    pub fn get(&self, id: i64) -> Option<QueueItem> {
        self.items.lock().unwrap().get(&id).cloned()
    }

    /// Number of stored items in any state.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, item: &QueueItem) -> Result<i64> {
        Ok(self.seed(item.clone()))
    }

    async fn update(&self, item: &QueueItem) -> Result<()> {
        let mut items = self.items.lock().map_err(|e| ApiError::Storage(e.to_string()))?;
        if !items.contains_key(&item.id) {
            return Err(ApiError::Storage(format!("item {} not found", item.id)));
        }
        items.insert(item.id, item.clone());
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.items.lock().map_err(|e| ApiError::Storage(e.to_string()))?.remove(&id);
        Ok(())
    }

    async fn load_active(&self) -> Result<Vec<QueueItem>> {
        let items = self.items.lock().map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(items.values().filter(|item| !item.state.is_terminal()).cloned().collect())
    }

    async fn load_by_state(&self, state: QueueItemState) -> Result<Vec<QueueItem>> {
        let items = self.items.lock().map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(items.values().filter(|item| item.state == state).cloned().collect())
    }

    async fn count_active(&self) -> Result<usize> {
        let items = self.items.lock().map_err(|e| ApiError::Storage(e.to_string()))?;
        Ok(items.values().filter(|item| !item.state.is_terminal()).count())
    }

    async fn clear(&self) -> Result<usize> {
        let mut items = self.items.lock().map_err(|e| ApiError::Storage(e.to_string()))?;
        let count = items.len();
        items.clear();
        Ok(count)
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut items = self.items.lock().map_err(|e| ApiError::Storage(e.to_string()))?;
        let before = items.len();
        items.retain(|_, item| !(item.state.is_terminal() && item.created_at < cutoff));
        Ok(before - items.len())
    }
}

/// Scripted transport: pops one response per call, falling back to 200.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<TransportResponse>>>,
    calls: Mutex<Vec<QueuedRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response.
    pub fn push_response(&self, response: Result<TransportResponse>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Requests executed so far, in order.
    pub fn calls(&self) -> Vec<QueuedRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Paths executed so far, in order.
    pub fn paths(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|r| r.path.clone()).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: &QueuedRequest) -> Result<TransportResponse> {
        self.calls.lock().map_err(|e| ApiError::Internal(e.to_string()))?.push(request.clone());
        let next = self.responses.lock().map_err(|e| ApiError::Internal(e.to_string()))?.pop_front();
        next.unwrap_or(Ok(TransportResponse { status: 200, body: None }))
    }
}

/// Connectivity monitor driven by tests.
pub struct StaticConnectivity {
    tx: watch::Sender<bool>,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Flip the online state, notifying subscribers.
    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }
}

impl ConnectivityMonitor for StaticConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
