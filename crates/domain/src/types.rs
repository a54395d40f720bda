//! Core data types for the offline sync queue.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue item priority levels
///
/// Higher ordinal values are drained first; `created_at` breaks ties within
/// a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value {
            3 => Priority::Critical,
            2 => Priority::High,
            1 => Priority::Normal,
            _ => Priority::Low,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "Critical"),
            Priority::High => write!(f, "High"),
            Priority::Normal => write!(f, "Normal"),
            Priority::Low => write!(f, "Low"),
        }
    }
}

/// Logical operation a queue item performs on its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Item state in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemState {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl QueueItemState {
    /// Completed and failed items are terminal and eventually purged.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for QueueItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueItemState::Pending => write!(f, "pending"),
            QueueItemState::Syncing => write!(f, "syncing"),
            QueueItemState::Completed => write!(f, "completed"),
            QueueItemState::Failed => write!(f, "failed"),
        }
    }
}

/// HTTP verb carried by a queued request.
///
/// A tagged variant decoded via pattern match; requests never encode the
/// verb inside the endpoint string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A serialized mutating request, stored verbatim inside a queue item and
/// replayed against the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub method: HttpMethod,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
}

impl QueuedRequest {
    /// Create a request with no body, headers, or query parameters.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), body: None, headers: HashMap::new(), query: HashMap::new() }
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// The endpoint key used for circuit-breaker bookkeeping.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.path
    }

    /// Validate the request before it is accepted into the queue.
    pub fn validate(&self) -> Result<(), String> {
        if self.path.is_empty() {
            return Err("Request path must not be empty".to_string());
        }
        if !self.path.starts_with('/') {
            return Err(format!("Request path must start with '/': {}", self.path));
        }
        Ok(())
    }
}

/// Derive the logical entity type from a request path.
///
/// Skips API and version prefixes so `/api/v1/orders/42` and `/orders/42`
/// both group under `orders`.
#[must_use]
pub fn entity_type_from_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .find(|segment| {
            let lowered = segment.to_ascii_lowercase();
            lowered != "api"
                && !(lowered.len() > 1
                    && lowered.starts_with('v')
                    && lowered[1..].chars().all(|c| c.is_ascii_digit()))
        })
        .map_or_else(|| "unknown".to_string(), |segment| segment.to_ascii_lowercase())
}

/// A durable record of one pending mutating operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Store-assigned monotonically increasing id; 0 before insertion.
    pub id: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: Operation,
    pub request: QueuedRequest,
    pub priority: Priority,
    pub state: QueueItemState,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Entity id that must no longer be pending before this item is
    /// eligible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Sent as the `Idempotency-Key` header so replays after ambiguous
    /// failures cannot double-apply.
    pub idempotency_key: String,
}

impl QueueItem {
    /// Create a new pending item. The id is assigned by the store at
    /// insertion.
    pub fn new(
        entity_id: impl Into<String>,
        operation: Operation,
        request: QueuedRequest,
        priority: Priority,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let entity_type = entity_type_from_path(&request.path);
        Self {
            id: 0,
            entity_type,
            entity_id: entity_id.into(),
            operation,
            request,
            priority,
            state: QueueItemState::Pending,
            retry_count: 0,
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX))),
            depends_on: None,
            last_error: None,
            idempotency_key: Uuid::new_v4().to_string(),
        }
    }

    /// Set the dependency entity id.
    #[must_use]
    pub fn with_depends_on(mut self, entity_id: impl Into<String>) -> Self {
        self.depends_on = Some(entity_id.into());
        self
    }

    /// Whether the TTL has passed; expired items are purged regardless of
    /// remaining retry budget.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether the item still has retry budget.
    #[must_use]
    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.retry_count < max_retries
    }

    /// Promote the item to syncing.
    pub fn mark_syncing(&mut self) {
        self.state = QueueItemState::Syncing;
    }

    /// Mark the item as completed (terminal).
    pub fn mark_completed(&mut self) {
        self.state = QueueItemState::Completed;
        self.last_error = None;
    }

    /// Mark the item as failed (terminal), recording the reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.state = QueueItemState::Failed;
        self.last_error = Some(reason.into());
    }

    /// Return the item to pending after a failed attempt, consuming one
    /// retry.
    pub fn mark_retry(&mut self, reason: impl Into<String>) {
        self.state = QueueItemState::Pending;
        self.retry_count += 1;
        self.last_error = Some(reason.into());
    }
}

/// Response produced by the transport executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl TransportResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Best-effort error text extracted from the response body.
    #[must_use]
    pub fn error_message(&self) -> String {
        self.body
            .as_ref()
            .and_then(|body| body.get("message").or_else(|| body.get("error")))
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

/// Snapshot of queue composition returned by `stats()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_pending: usize,
    pub per_priority: HashMap<Priority, usize>,
    pub expired: usize,
}

/// Summary of one full sync orchestrator pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    pub processed_count: usize,
    pub failed_count: usize,
    pub message: String,
}

impl SyncResult {
    /// A pass that performed no work (offline, already running, or empty
    /// queue).
    pub fn skipped(message: impl Into<String>) -> Self {
        Self { success: true, processed_count: 0, failed_count: 0, message: message.into() }
    }
}
