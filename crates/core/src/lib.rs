//! # Waypoint Core
//!
//! Application services of the sync core — pure logic over port traits.
//!
//! This crate contains:
//! - Port/adapter interfaces (`Transport`, `QueueStore`,
//!   `ConnectivityMonitor`)
//! - The offline request queue and the sync orchestrator
//! - The auth retry coordinator (single-flight token refresh)
//!
//! ## Architecture Principles
//! - Only depends on `waypoint-domain` and `waypoint-common`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits
//! - Pure, testable business logic

pub mod auth;
pub mod sync;
pub mod testing;

// Re-export specific items to avoid ambiguity
pub use auth::coordinator::{AuthRetryConfig, AuthRetryCoordinator};
pub use sync::orchestrator::{SyncConfig, SyncOrchestrator};
pub use sync::ports::{ConnectivityMonitor, QueueStore, Transport};
pub use sync::queue::{OfflineQueue, QueueConfig};
