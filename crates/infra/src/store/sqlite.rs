//! SQLite-backed implementation of the queue store port.
//!
//! All calls run on the blocking pool; the connection pool hands one
//! connection per operation. The store only guarantees what the port asks
//! for: insertion-ordered reads and atomic single-item transitions —
//! drain ordering is a read-time sort in the service layer.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Row};
use tokio::task;
use tracing::debug;
use waypoint_core::QueueStore;
use waypoint_domain::{ApiError, Operation, Priority, QueueItem, QueueItemState, Result};

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS offline_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        request_json TEXT NOT NULL,
        priority INTEGER NOT NULL,
        state TEXT NOT NULL,
        retry_count INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        depends_on TEXT,
        last_error TEXT,
        idempotency_key TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_offline_queue_state ON offline_queue(state);
";

const INSERT_SQL: &str = "INSERT INTO offline_queue (
        entity_type, entity_id, operation, request_json, priority, state, retry_count,
        created_at, expires_at, depends_on, last_error, idempotency_key
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const UPDATE_SQL: &str = "UPDATE offline_queue SET
        entity_type = ?1, entity_id = ?2, operation = ?3, request_json = ?4, priority = ?5,
        state = ?6, retry_count = ?7, created_at = ?8, expires_at = ?9, depends_on = ?10,
        last_error = ?11, idempotency_key = ?12
    WHERE id = ?13";

const SELECT_COLUMNS: &str = "id, entity_type, entity_id, operation, request_json, priority,
        state, retry_count, created_at, expires_at, depends_on, last_error, idempotency_key";

/// SQLite-backed queue store (rusqlite + connection pool).
pub struct SqliteQueueStore {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl SqliteQueueStore {
    /// Open (creating if needed) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = r2d2::Pool::builder()
            .build(manager)
            .map_err(|e| ApiError::Storage(format!("failed to open queue store: {e}")))?;

        let conn = pool.get().map_err(|e| ApiError::Storage(e.to_string()))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| ApiError::Storage(format!("failed to create schema: {e}")))?;
        drop(conn);

        debug!(path = %path.as_ref().display(), "Opened SQLite queue store");
        Ok(Self { pool })
    }

    /// Run a closure against a pooled connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| ApiError::Storage(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| ApiError::Storage(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert(&self, item: &QueueItem) -> Result<i64> {
        let item = item.clone();
        self.run(move |conn| {
            conn.execute(
                INSERT_SQL,
                params![
                    item.entity_type,
                    item.entity_id,
                    item.operation.to_string(),
                    serde_json::to_string(&item.request)
                        .map_err(|e| ApiError::Storage(e.to_string()))?,
                    item.priority as i64,
                    item.state.to_string(),
                    item.retry_count,
                    item.created_at.timestamp_millis(),
                    item.expires_at.timestamp_millis(),
                    item.depends_on,
                    item.last_error,
                    item.idempotency_key,
                ],
            )
            .map_err(map_sqlite_error)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn update(&self, item: &QueueItem) -> Result<()> {
        let item = item.clone();
        self.run(move |conn| {
            let changed = conn
                .execute(
                    UPDATE_SQL,
                    params![
                        item.entity_type,
                        item.entity_id,
                        item.operation.to_string(),
                        serde_json::to_string(&item.request)
                            .map_err(|e| ApiError::Storage(e.to_string()))?,
                        item.priority as i64,
                        item.state.to_string(),
                        item.retry_count,
                        item.created_at.timestamp_millis(),
                        item.expires_at.timestamp_millis(),
                        item.depends_on,
                        item.last_error,
                        item.idempotency_key,
                        item.id,
                    ],
                )
                .map_err(map_sqlite_error)?;

            if changed == 0 {
                return Err(ApiError::Storage(format!("item {} not found", item.id)));
            }
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        self.run(move |conn| {
            conn.execute("DELETE FROM offline_queue WHERE id = ?1", params![id])
                .map_err(map_sqlite_error)?;
            Ok(())
        })
        .await
    }

    async fn load_active(&self) -> Result<Vec<QueueItem>> {
        self.run(move |conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM offline_queue
                 WHERE state IN ('pending', 'syncing') ORDER BY id ASC"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
            let items = stmt
                .query_map([], map_item_row)
                .map_err(map_sqlite_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sqlite_error)?;
            Ok(items)
        })
        .await
    }

    async fn load_by_state(&self, state: QueueItemState) -> Result<Vec<QueueItem>> {
        self.run(move |conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM offline_queue WHERE state = ?1 ORDER BY id ASC"
            );
            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
            let items = stmt
                .query_map(params![state.to_string()], map_item_row)
                .map_err(map_sqlite_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sqlite_error)?;
            Ok(items)
        })
        .await
    }

    async fn count_active(&self) -> Result<usize> {
        self.run(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM offline_queue WHERE state IN ('pending', 'syncing')",
                    [],
                    |row| row.get(0),
                )
                .map_err(map_sqlite_error)?;
            Ok(count as usize)
        })
        .await
    }

    async fn clear(&self) -> Result<usize> {
        self.run(move |conn| {
            let removed =
                conn.execute("DELETE FROM offline_queue", []).map_err(map_sqlite_error)?;
            Ok(removed)
        })
        .await
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_millis = cutoff.timestamp_millis();
        self.run(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM offline_queue
                     WHERE state IN ('completed', 'failed') AND created_at < ?1",
                    params![cutoff_millis],
                )
                .map_err(map_sqlite_error)?;
            Ok(removed)
        })
        .await
    }
}

fn map_sqlite_error(err: rusqlite::Error) -> ApiError {
    ApiError::Storage(err.to_string())
}

fn map_item_row(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    let operation_raw: String = row.get(3)?;
    let request_json: String = row.get(4)?;
    let priority_raw: i64 = row.get(5)?;
    let state_raw: String = row.get(6)?;
    let created_at_millis: i64 = row.get(8)?;
    let expires_at_millis: i64 = row.get(9)?;

    Ok(QueueItem {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        operation: parse_operation(&operation_raw)
            .map_err(|e| conversion_error(3, e))?,
        request: serde_json::from_str(&request_json).map_err(|e| conversion_error(4, e))?,
        priority: Priority::from(priority_raw.clamp(0, 3) as u8),
        state: parse_state(&state_raw).map_err(|e| conversion_error(6, e))?,
        retry_count: row.get(7)?,
        created_at: timestamp_from_millis(created_at_millis)
            .map_err(|e| conversion_error(8, e))?,
        expires_at: timestamp_from_millis(expires_at_millis)
            .map_err(|e| conversion_error(9, e))?,
        depends_on: row.get(10)?,
        last_error: row.get(11)?,
        idempotency_key: row.get(12)?,
    })
}

fn parse_operation(raw: &str) -> std::result::Result<Operation, std::io::Error> {
    match raw {
        "create" => Ok(Operation::Create),
        "update" => Ok(Operation::Update),
        "delete" => Ok(Operation::Delete),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown operation: {other}"),
        )),
    }
}

fn parse_state(raw: &str) -> std::result::Result<QueueItemState, std::io::Error> {
    match raw {
        "pending" => Ok(QueueItemState::Pending),
        "syncing" => Ok(QueueItemState::Syncing),
        "completed" => Ok(QueueItemState::Completed),
        "failed" => Ok(QueueItemState::Failed),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown state: {other}"),
        )),
    }
}

fn timestamp_from_millis(millis: i64) -> std::result::Result<DateTime<Utc>, std::io::Error> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("timestamp out of range: {millis}"),
        )
    })
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    //! Unit tests for the SQLite queue store.
    use std::time::Duration;

    use waypoint_domain::{HttpMethod, QueuedRequest};

    use super::*;

    fn open_store() -> (SqliteQueueStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteQueueStore::open(dir.path().join("queue.db")).unwrap();
        (store, dir)
    }

    /// Millisecond-truncated "now" so round trips through the store compare
    /// equal.
    fn now_millis() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(Utc::now().timestamp_millis()).single().unwrap()
    }

    fn sample_item(entity_id: &str) -> QueueItem {
        QueueItem::new(
            entity_id,
            Operation::Create,
            QueuedRequest::new(HttpMethod::Post, "/api/v1/orders")
                .with_body(serde_json::json!({"sku": "A-1"}))
                .with_header("X-Client", "waypoint"),
            Priority::High,
            Duration::from_secs(3600),
            now_millis(),
        )
        .with_depends_on("customer-7")
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids_and_round_trips() {
        let (store, _dir) = open_store();

        let mut item = sample_item("order-1");
        let first_id = store.insert(&item).await.unwrap();
        let second_id = store.insert(&sample_item("order-2")).await.unwrap();
        assert!(second_id > first_id);

        item.id = first_id;
        let loaded = store.load_active().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], item, "Stored item round-trips field-for-field");
    }

    #[tokio::test]
    async fn load_active_preserves_insertion_order_and_excludes_terminal() {
        let (store, _dir) = open_store();

        let first = store.insert(&sample_item("order-1")).await.unwrap();
        let second = store.insert(&sample_item("order-2")).await.unwrap();
        let third = store.insert(&sample_item("order-3")).await.unwrap();

        let mut done = store.load_active().await.unwrap()[1].clone();
        assert_eq!(done.id, second);
        done.mark_completed();
        store.update(&done).await.unwrap();

        let active = store.load_active().await.unwrap();
        let ids: Vec<_> = active.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![first, third]);
    }

    #[tokio::test]
    async fn update_is_an_atomic_single_item_transition() {
        let (store, _dir) = open_store();
        let id = store.insert(&sample_item("order-1")).await.unwrap();

        let mut item = store.load_active().await.unwrap().remove(0);
        assert_eq!(item.id, id);
        item.mark_retry("socket closed");
        store.update(&item).await.unwrap();

        let reloaded = store.load_active().await.unwrap().remove(0);
        assert_eq!(reloaded.retry_count, 1);
        assert_eq!(reloaded.last_error.as_deref(), Some("socket closed"));
        assert_eq!(reloaded.state, QueueItemState::Pending);
    }

    #[tokio::test]
    async fn update_of_missing_item_fails() {
        let (store, _dir) = open_store();
        let mut item = sample_item("order-1");
        item.id = 999;
        assert!(matches!(store.update(&item).await, Err(ApiError::Storage(_))));
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let (store, _dir) = open_store();
        let id = store.insert(&sample_item("order-1")).await.unwrap();

        store.delete(id).await.unwrap();
        assert!(store.load_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn count_active_tracks_non_terminal_items() {
        let (store, _dir) = open_store();
        store.insert(&sample_item("order-1")).await.unwrap();
        store.insert(&sample_item("order-2")).await.unwrap();
        assert_eq!(store.count_active().await.unwrap(), 2);

        let mut item = store.load_active().await.unwrap().remove(0);
        item.mark_failed("boom");
        store.update(&item).await.unwrap();
        assert_eq!(store.count_active().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn load_by_state_filters() {
        let (store, _dir) = open_store();
        store.insert(&sample_item("order-1")).await.unwrap();
        store.insert(&sample_item("order-2")).await.unwrap();

        let mut item = store.load_active().await.unwrap().remove(0);
        item.mark_failed("boom");
        store.update(&item).await.unwrap();

        let failed = store.load_by_state(QueueItemState::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].entity_id, "order-1");
        let pending = store.load_by_state(QueueItemState::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let (store, _dir) = open_store();
        store.insert(&sample_item("order-1")).await.unwrap();
        store.insert(&sample_item("order-2")).await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.count_active().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_terminal_honors_state_and_cutoff() {
        let (store, _dir) = open_store();

        let mut old_completed = sample_item("order-old");
        old_completed.created_at = now_millis() - chrono::Duration::days(10);
        old_completed.mark_completed();
        store.insert(&old_completed).await.unwrap();

        let mut fresh_completed = sample_item("order-new");
        fresh_completed.mark_completed();
        store.insert(&fresh_completed).await.unwrap();

        let mut old_pending = sample_item("order-pending");
        old_pending.created_at = now_millis() - chrono::Duration::days(10);
        store.insert(&old_pending).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let purged = store.purge_terminal_older_than(cutoff).await.unwrap();

        assert_eq!(purged, 1, "Only old terminal rows are purged");
        assert_eq!(store.count_active().await.unwrap(), 1, "Old pending row survives");
        assert_eq!(store.load_by_state(QueueItemState::Completed).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let store = SqliteQueueStore::open(&path).unwrap();
        store.insert(&sample_item("order-1")).await.unwrap();
        drop(store);

        let reopened = SqliteQueueStore::open(&path).unwrap();
        let items = reopened.load_active().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entity_id, "order-1");
    }
}
