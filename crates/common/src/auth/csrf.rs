//! Stateless CSRF token source
//!
//! Fetches an ephemeral anti-forgery token per mutating request. Tokens are
//! never cached — every call is a fresh network fetch, which keeps the
//! replay-attack surface minimal at the cost of one extra round trip per
//! mutation.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::types::AuthConfig;

/// Error type for CSRF token fetches
#[derive(Debug)]
pub enum CsrfError {
    /// The issuance endpoint returned a non-success status
    Server { status: u16, message: String },

    /// Transport-level failure (no connectivity, timeout)
    Network(String),

    /// The response body did not contain a token
    ParseError(String),
}

impl std::fmt::Display for CsrfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server { status, message } => {
                write!(f, "CSRF endpoint returned {status}: {message}")
            }
            Self::Network(msg) => write!(f, "CSRF fetch failed: {msg}"),
            Self::ParseError(msg) => write!(f, "CSRF response parse error: {msg}"),
        }
    }
}

impl std::error::Error for CsrfError {}

#[derive(Deserialize)]
struct CsrfTokenResponse {
    csrf_token: String,
}

/// Per-call CSRF token source (no caching, fails closed)
#[derive(Debug, Clone)]
pub struct CsrfTokenSource {
    config: AuthConfig,
    client: Client,
}

impl CsrfTokenSource {
    /// Create a new token source
    pub fn new(config: AuthConfig) -> Result<Self, CsrfError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CsrfError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Fetch a fresh CSRF token.
    ///
    /// Performs a network fetch on every invocation and fails closed:
    /// callers that require CSRF protection must not proceed on error.
    pub async fn token(&self) -> Result<String, CsrfError> {
        let url = self.config.csrf_url();
        debug!(%url, "Fetching CSRF token");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CsrfError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "CSRF issuance rejected");
            return Err(CsrfError::Server { status: status.as_u16(), message });
        }

        let parsed: CsrfTokenResponse = response
            .json()
            .await
            .map_err(|e| CsrfError::ParseError(e.to_string()))?;

        if parsed.csrf_token.is_empty() {
            return Err(CsrfError::ParseError("empty csrf_token in response".to_string()));
        }

        Ok(parsed.csrf_token)
    }

    /// Fetch a fresh CSRF token, converting any failure to `None`.
    ///
    /// For endpoints that tolerate missing CSRF protection.
    pub async fn token_or_none(&self) -> Option<String> {
        match self.token().await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "Proceeding without CSRF token");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the CSRF token source against a mock HTTP server.
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn source_for(server: &MockServer) -> CsrfTokenSource {
        CsrfTokenSource::new(AuthConfig::new(server.uri())).unwrap()
    }

    #[tokio::test]
    async fn fetches_a_token_per_call_without_caching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/csrf"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "csrf_token": "tok-1"
                })),
            )
            .expect(2) // two calls must hit the server twice
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        assert_eq!(source.token().await.unwrap(), "tok-1");
        assert_eq!(source.token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn fails_closed_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/csrf"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        match source.token().await {
            Err(CsrfError::Server { status: 503, message }) => {
                assert!(message.contains("maintenance"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_bodies_without_a_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/csrf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "unexpected": true
            })))
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        assert!(matches!(source.token().await, Err(CsrfError::ParseError(_))));
    }

    #[tokio::test]
    async fn token_or_none_degrades_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/csrf"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        assert!(source.token_or_none().await.is_none());
    }

    #[tokio::test]
    async fn token_or_none_passes_through_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/csrf"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "csrf_token": "tok-9"
            })))
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        assert_eq!(source.token_or_none().await.as_deref(), Some("tok-9"));
    }
}
