//! Port interfaces for sync operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use waypoint_domain::{QueueItem, QueueItemState, QueuedRequest, Result, TransportResponse};

/// Trait for the opaque request executor
///
/// The queue and the orchestrator depend only on this minimal contract:
/// a serialized request in, a status/body pair or a network failure out.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request against the backend
    async fn execute(&self, request: &QueuedRequest) -> Result<TransportResponse>;
}

/// Trait for the durable queue store
///
/// Ordering is a read-time sort, not a storage invariant: the store only
/// guarantees insertion order for `load_active` and atomic single-item state
/// transitions.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new item, returning its store-assigned id
    async fn insert(&self, item: &QueueItem) -> Result<i64>;

    /// Replace a stored item (atomic single-item state transition)
    async fn update(&self, item: &QueueItem) -> Result<()>;

    /// Delete an item outright
    async fn delete(&self, id: i64) -> Result<()>;

    /// All non-terminal items ordered by insertion
    async fn load_active(&self) -> Result<Vec<QueueItem>>;

    /// All items in a given state ordered by insertion
    async fn load_by_state(&self, state: QueueItemState) -> Result<Vec<QueueItem>>;

    /// Count of non-terminal items (capacity checks)
    async fn count_active(&self) -> Result<usize>;

    /// Remove every item, returning how many were dropped
    async fn clear(&self) -> Result<usize>;

    /// Delete terminal (completed/failed) items created before the cutoff
    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Trait for the connectivity signal
pub trait ConnectivityMonitor: Send + Sync {
    /// Whether the device is online right now
    fn is_online(&self) -> bool;

    /// Subscribe to online/offline transition events
    fn subscribe(&self) -> watch::Receiver<bool>;
}
