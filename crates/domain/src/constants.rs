//! Domain constants shared across the sync core.

use std::time::Duration;

/// Maximum number of non-terminal items the offline queue accepts.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Per-item retry budget before an item is purged as failed.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default time-to-live for a queued item.
pub const DEFAULT_ITEM_TTL: Duration = Duration::from_secs(24 * 3600);

/// Maximum number of requests parked while a token refresh is in flight.
pub const PARKED_REQUEST_CAP: usize = 50;

/// Timeout applied to a single token refresh attempt.
pub const TOKEN_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);
