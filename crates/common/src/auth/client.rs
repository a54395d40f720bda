//! Token-refresh endpoint client
//!
//! Exchanges a refresh token for a new access/refresh token pair against the
//! backend refresh endpoint. Login and logout flows belong to the platform
//! layer; only the refresh contract lives in the sync core.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::traits::AuthApi;
use super::types::{AuthConfig, TokenResponse, TokenSet};

/// Error type for auth client operations
#[derive(Debug)]
pub enum AuthClientError {
    /// HTTP request failed at the transport level
    RequestFailed(reqwest::Error),

    /// The refresh endpoint returned a non-success status
    Server { status: u16, message: String },

    /// Failed to parse the token response
    ParseError(String),

    /// Invalid configuration
    ConfigError(String),
}

impl std::fmt::Display for AuthClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestFailed(e) => write!(f, "HTTP request failed: {e}"),
            Self::Server { status, message } => {
                write!(f, "Refresh endpoint returned {status}: {message}")
            }
            Self::ParseError(msg) => write!(f, "Parse error: {msg}"),
            Self::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for AuthClientError {}

impl From<reqwest::Error> for AuthClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::RequestFailed(err)
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Reqwest-backed client for the token refresh endpoint
#[derive(Debug, Clone)]
pub struct AuthClient {
    config: AuthConfig,
    client: Client,
}

impl AuthClient {
    /// Create a new auth client with the given configuration
    pub fn new(config: AuthConfig) -> Result<Self, AuthClientError> {
        if config.base_url.is_empty() {
            return Err(AuthClientError::ConfigError("base_url must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AuthClientError::RequestFailed)?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl AuthApi for AuthClient {
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenSet, AuthClientError> {
        let url = self.config.refresh_url();
        debug!(%url, "Refreshing access token");

        let response =
            self.client.post(&url).json(&RefreshRequest { refresh_token }).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token refresh rejected");
            return Err(AuthClientError::Server { status: status.as_u16(), message });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthClientError::ParseError(e.to_string()))?;

        Ok(TokenSet::from(token_response))
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the refresh client against a mock HTTP server.
    use wiremock::matchers::{body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn client_for(server: &MockServer) -> AuthClient {
        AuthClient::new(AuthConfig::new(server.uri())).unwrap()
    }

    #[tokio::test]
    async fn refresh_returns_new_token_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(body_json_string(r#"{"refresh_token":"old-refresh"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let tokens = client.refresh_access_token("old-refresh").await.unwrap();

        assert_eq!(tokens.access_token, "new-access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("new-refresh"));
        assert!(!tokens.is_expired());
    }

    #[tokio::test]
    async fn refresh_surfaces_server_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_grant"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.refresh_access_token("revoked").await;

        match result {
            Err(AuthClientError::Server { status: 401, message }) => {
                assert!(message.contains("invalid_grant"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_surfaces_parse_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.refresh_access_token("old").await;
        assert!(matches!(result, Err(AuthClientError::ParseError(_))));
    }

    #[test]
    fn rejects_empty_base_url() {
        let result = AuthClient::new(AuthConfig::new(""));
        assert!(matches!(result, Err(AuthClientError::ConfigError(_))));
    }
}
