//! Token manager for the credential lifecycle
//!
//! Manages the current token pair:
//! - Load from the secure store on startup
//! - Proactive-refresh detection (configurable lead, default 5 min)
//! - Refresh-token exchange with wholesale swap on success
//! - Wholesale clear on logout or refresh failure
//!
//! The manager is not internally single-flight: exactly one refresh may
//! execute at a time system-wide, and that invariant is enforced by the auth
//! retry coordinator's idle/refreshing gate. Do not call [`TokenManager::refresh`]
//! concurrently outside that gate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::client::AuthClientError;
use super::traits::{AuthApi, SecureStore};
use super::types::TokenSet;

/// Storage key under which the serialized token set lives.
const TOKEN_STORAGE_KEY: &str = "waypoint.tokens";

/// Error type for token manager operations
#[derive(Debug)]
pub enum TokenManagerError {
    /// Secure store operation failed
    SecureStore(String),

    /// Refresh endpoint call failed
    Api(AuthClientError),

    /// No tokens available (not authenticated)
    NotAuthenticated,

    /// No refresh token available
    NoRefreshToken,

    /// Token set could not be (de)serialized for the secure store
    Serialization(String),
}

impl std::fmt::Display for TokenManagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SecureStore(e) => write!(f, "Secure store error: {e}"),
            Self::Api(e) => write!(f, "Auth API error: {e}"),
            Self::NotAuthenticated => write!(f, "Not authenticated (no tokens)"),
            Self::NoRefreshToken => write!(f, "No refresh token available"),
            Self::Serialization(e) => write!(f, "Token serialization error: {e}"),
        }
    }
}

impl std::error::Error for TokenManagerError {}

impl From<AuthClientError> for TokenManagerError {
    fn from(err: AuthClientError) -> Self {
        Self::Api(err)
    }
}

/// Token manager holding the current credential set
///
/// Thread-safe: the token set lives behind an async `RwLock` and is replaced
/// as a whole — there is no partial update path.
pub struct TokenManager<A: AuthApi + 'static, S: SecureStore + 'static> {
    api: Arc<A>,
    store: Arc<S>,
    current: Arc<RwLock<Option<TokenSet>>>,
    refresh_lead: Duration,
}

impl<A: AuthApi + 'static, S: SecureStore + 'static> TokenManager<A, S> {
    /// Create a new token manager
    ///
    /// # Arguments
    /// * `api` - Refresh endpoint client
    /// * `store` - Secure store for persistence
    /// * `refresh_lead` - Refresh tokens this long before expiry
    #[must_use]
    pub fn new(api: A, store: Arc<S>, refresh_lead: Duration) -> Self {
        Self {
            api: Arc::new(api),
            store,
            current: Arc::new(RwLock::new(None)),
            refresh_lead,
        }
    }

    /// Initialize by loading tokens from the secure store
    ///
    /// Should be called on app startup. Returns `true` when a persisted
    /// token set was loaded. A corrupt entry is ignored (and reported as
    /// not loaded) rather than failing startup.
    pub async fn initialize(&self) -> Result<bool, TokenManagerError> {
        let raw = self
            .store
            .get(TOKEN_STORAGE_KEY)
            .await
            .map_err(TokenManagerError::SecureStore)?;

        let Some(raw) = raw else {
            debug!("No existing tokens found in secure store");
            return Ok(false);
        };

        match serde_json::from_str::<TokenSet>(&raw) {
            Ok(tokens) => {
                *self.current.write().await = Some(tokens);
                info!("Token manager initialized with existing tokens");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "Ignoring corrupt token entry in secure store");
                Ok(false)
            }
        }
    }

    /// Store a new token set (after a successful login or refresh)
    pub async fn store_tokens(&self, tokens: TokenSet) -> Result<(), TokenManagerError> {
        let serialized = serde_json::to_string(&tokens)
            .map_err(|e| TokenManagerError::Serialization(e.to_string()))?;

        self.store
            .set(TOKEN_STORAGE_KEY, &serialized)
            .await
            .map_err(TokenManagerError::SecureStore)?;

        *self.current.write().await = Some(tokens);
        info!("Tokens stored");

        Ok(())
    }

    /// Current access token
    ///
    /// Does not refresh: the auth retry coordinator owns the refresh
    /// decision; callers seeing an expired token go through it.
    pub async fn access_token(&self) -> Result<String, TokenManagerError> {
        let tokens = self.current.read().await;
        tokens
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(TokenManagerError::NotAuthenticated)
    }

    /// Current token set, or `None` when not authenticated
    pub async fn current_tokens(&self) -> Option<TokenSet> {
        self.current.read().await.clone()
    }

    /// Whether a token set is held
    pub async fn is_authenticated(&self) -> bool {
        self.current.read().await.is_some()
    }

    /// Whether the held token is expired or within the refresh lead
    pub async fn should_refresh(&self) -> bool {
        let tokens = self.current.read().await;
        tokens.as_ref().is_some_and(|t| t.should_refresh(self.refresh_lead))
    }

    /// Exchange the refresh token for a new pair
    ///
    /// On success the held token set is replaced wholesale and persisted.
    /// On failure all held credentials are cleared — memory and store — so
    /// the caller can drive a fresh login.
    ///
    /// Must only be called under the coordinator's refresh gate.
    pub async fn refresh(&self) -> Result<(), TokenManagerError> {
        let refresh_token = {
            let tokens = self.current.read().await;
            match tokens.as_ref() {
                Some(t) => t
                    .refresh_token
                    .clone()
                    .ok_or(TokenManagerError::NoRefreshToken)?,
                None => return Err(TokenManagerError::NotAuthenticated),
            }
        };

        match self.api.refresh_access_token(&refresh_token).await {
            Ok(new_tokens) => {
                self.store_tokens(new_tokens).await?;
                info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed; clearing credentials");
                if let Err(clear_err) = self.clear_tokens().await {
                    warn!(error = %clear_err, "Failed to clear credentials after refresh failure");
                }
                Err(TokenManagerError::Api(e))
            }
        }
    }

    /// Clear all tokens (logout)
    pub async fn clear_tokens(&self) -> Result<(), TokenManagerError> {
        self.store
            .delete(TOKEN_STORAGE_KEY)
            .await
            .map_err(TokenManagerError::SecureStore)?;

        *self.current.write().await = None;
        info!("Tokens cleared");

        Ok(())
    }

    /// The configured refresh lead
    #[must_use]
    pub fn refresh_lead(&self) -> Duration {
        self.refresh_lead
    }
}
