//! Traits for auth and secure storage operations
//!
//! These traits enable dependency injection and testing by abstracting
//! external dependencies (the token-refresh endpoint, the platform's
//! encrypted key/value store).

use std::sync::Arc;

use async_trait::async_trait;

use super::client::AuthClientError;
use super::types::TokenSet;

/// Trait for the token-refresh API contract
///
/// Abstracts the backend refresh endpoint so the token manager can be tested
/// with mock implementations.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange a refresh token for a new access/refresh token pair
    ///
    /// # Errors
    /// Returns error if the exchange fails or the token is invalid/revoked
    async fn refresh_access_token(&self, refresh_token: &str)
        -> Result<TokenSet, AuthClientError>;
}

/// Implement `AuthApi` for `Arc<T>` so shared clients can be passed by
/// handle.
#[async_trait]
impl<T: AuthApi + ?Sized> AuthApi for Arc<T> {
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenSet, AuthClientError> {
        (**self).refresh_access_token(refresh_token).await
    }
}

/// Trait for the platform's secure key/value store
///
/// The store is opaque to this subsystem: values are strings, assumed
/// encrypted at rest by the platform. Errors are surfaced as strings the
/// way platform keychain wrappers report them.
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Retrieve a value, or `None` if the key does not exist
    async fn get(&self, key: &str) -> Result<Option<String>, String>;

    /// Store a value under a key, replacing any existing value
    async fn set(&self, key: &str, value: &str) -> Result<(), String>;

    /// Delete a key; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), String>;
}
