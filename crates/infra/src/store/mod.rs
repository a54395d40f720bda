//! Durable queue store implementations.

pub mod sqlite;

pub use sqlite::SqliteQueueStore;
