//! Token and auth configuration types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lead time before expiry at which a proactive refresh is due.
pub const DEFAULT_REFRESH_LEAD: Duration = Duration::from_secs(300);

/// Current credential set held by the token manager.
///
/// Immutable value: replaced wholesale on refresh, cleared wholesale on
/// logout or refresh failure. Never partially updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    /// JWT access token for API authentication
    pub access_token: String,

    /// Token type (always "Bearer" for OAuth 2.0)
    pub token_type: String,

    /// When this token set was issued (UTC)
    pub issued_at: DateTime<Utc>,

    /// Absolute expiration timestamp (UTC)
    pub expires_at: DateTime<Utc>,

    /// Refresh token for obtaining new access tokens
    /// Optional because some providers don't issue refresh tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Anti-forgery token attached to mutating requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

impl TokenSet {
    /// Create a new `TokenSet` with a calculated expiration time.
    ///
    /// # Arguments
    /// * `access_token` - The access token
    /// * `refresh_token` - Optional refresh token
    /// * `expires_in` - Token lifetime in seconds
    #[must_use]
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in: i64) -> Self {
        let issued_at = Utc::now();
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            issued_at,
            expires_at: issued_at + chrono::Duration::seconds(expires_in.max(0)),
            refresh_token,
            csrf_token: None,
        }
    }

    /// Attach a CSRF token.
    #[must_use]
    pub fn with_csrf_token(mut self, csrf_token: impl Into<String>) -> Self {
        self.csrf_token = Some(csrf_token.into());
        self
    }

    /// Whether the access token is past its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Whether the token should be refreshed proactively: true once we are
    /// within `lead` of the expiry, so refresh happens before a hard 401.
    #[must_use]
    pub fn should_refresh(&self, lead: Duration) -> bool {
        let lead = chrono::Duration::from_std(lead).unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() + lead >= self.expires_at
    }

    /// Seconds until token expiration (negative once expired).
    #[must_use]
    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }
}

/// Token response from the refresh endpoint.
///
/// Standard OAuth 2.0 token response format (RFC 6749).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
}

impl From<TokenResponse> for TokenSet {
    fn from(response: TokenResponse) -> Self {
        let mut set =
            Self::new(response.access_token, response.refresh_token, response.expires_in);
        if !response.token_type.is_empty() {
            set.token_type = response.token_type;
        }
        set
    }
}

/// Backend endpoints the auth clients talk to.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Backend base URL, no trailing slash (e.g. "https://api.example.com")
    pub base_url: String,

    /// Path of the token refresh endpoint
    pub refresh_path: String,

    /// Path of the CSRF issuance endpoint
    pub csrf_path: String,

    /// Per-request timeout for auth calls
    pub timeout: Duration,
}

impl AuthConfig {
    /// Create a configuration with the default endpoint paths.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: "/api/auth/refresh".to_string(),
            csrf_path: "/api/auth/csrf".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Full URL of the refresh endpoint.
    #[must_use]
    pub fn refresh_url(&self) -> String {
        format!("{}{}", self.base_url, self.refresh_path)
    }

    /// Full URL of the CSRF issuance endpoint.
    #[must_use]
    pub fn csrf_url(&self) -> String {
        format!("{}{}", self.base_url, self.csrf_path)
    }
}
