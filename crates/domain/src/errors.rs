//! Error types used throughout the sync core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Waypoint sync operations
///
/// The variants mirror the failure taxonomy of the sync core: transport
/// failures are retryable, conflicts and capacity failures are terminal and
/// surfaced to the caller, authentication failures are owned by the auth
/// retry coordinator.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ApiError {
    /// No connectivity or transport-level timeout. Always retryable up to
    /// the configured cap.
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response from the backend (except 401/409 which have their
    /// own variants).
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// 409 from the backend. Local and remote state diverged; never retried.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 401 from the backend. Handled by the auth retry coordinator, never by
    /// the raw queue retry path.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The offline queue reached its configured capacity.
    #[error("Offline queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// PKCE parameter generation or validation failed before any network
    /// call.
    #[error("PKCE error: {0}")]
    Pkce(String),

    /// Malformed input surfaced before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Durable queue store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Classify an HTTP status code into the domain taxonomy.
    ///
    /// 2xx statuses are not errors and must not be passed here.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::Auth(message),
            409 => Self::Conflict(message),
            _ => Self::Server { status, message },
        }
    }

    /// Whether the standard queue retry policy applies to this error.
    ///
    /// Conflicts are terminal, capacity and validation failures are surfaced
    /// synchronously, and auth failures are recovered by the coordinator
    /// rather than by blind retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Storage(_) => true,
            Self::Server { status, .. } => *status != 409,
            Self::Conflict(_)
            | Self::Auth(_)
            | Self::QueueFull { .. }
            | Self::Pkce(_)
            | Self::Validation(_)
            | Self::Internal(_) => false,
        }
    }
}

/// Result type alias for Waypoint sync operations
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    //! Unit tests for domain errors.
    use super::*;

    /// Validates `ApiError::from_status` classification.
    ///
    /// Assertions:
    /// - Confirms 401 maps to `ApiError::Auth`.
    /// - Confirms 409 maps to `ApiError::Conflict`.
    /// - Confirms other statuses map to `ApiError::Server`.
    #[test]
    fn test_from_status_classification() {
        assert!(matches!(ApiError::from_status(401, "expired"), ApiError::Auth(_)));
        assert!(matches!(ApiError::from_status(409, "diverged"), ApiError::Conflict(_)));
        assert!(matches!(
            ApiError::from_status(500, "boom"),
            ApiError::Server { status: 500, .. }
        ));
        assert!(matches!(
            ApiError::from_status(422, "bad"),
            ApiError::Server { status: 422, .. }
        ));
    }

    /// Validates retryability for every variant.
    #[test]
    fn test_is_retryable() {
        assert!(ApiError::Network("offline".into()).is_retryable());
        assert!(ApiError::Storage("disk".into()).is_retryable());
        assert!(ApiError::Server { status: 500, message: "boom".into() }.is_retryable());
        assert!(!ApiError::Conflict("diverged".into()).is_retryable());
        assert!(!ApiError::Auth("expired".into()).is_retryable());
        assert!(!ApiError::QueueFull { capacity: 1000 }.is_retryable());
        assert!(!ApiError::Pkce("short verifier".into()).is_retryable());
        assert!(!ApiError::Validation("empty path".into()).is_retryable());
    }

    /// Validates error display output carries the message.
    #[test]
    fn test_error_display() {
        let err = ApiError::Server { status: 503, message: "unavailable".into() };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("unavailable"));

        let err = ApiError::QueueFull { capacity: 1000 };
        assert!(err.to_string().contains("1000"));
    }

    /// Validates errors serialize with the tagged representation used by the
    /// UI layer.
    #[test]
    fn test_error_serialization() {
        let err = ApiError::Network("offline".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "Network");
        assert_eq!(json["message"], "offline");

        let back: ApiError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
