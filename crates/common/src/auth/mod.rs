//! Authentication building blocks for the sync core.
//!
//! This module consolidates the credential-side pieces the sync services
//! compose:
//! - `types` — token set and wire-format types
//! - `traits` — ports for the token-refresh API and the secure store
//! - `token_manager` — token lifecycle (load, swap, clear)
//! - `client` — reqwest-backed refresh-endpoint client
//! - `csrf` — stateless per-call CSRF token source
//! - `pkce` — RFC 7636 helpers

pub mod client;
pub mod csrf;
pub mod pkce;
pub mod token_manager;
pub mod traits;
pub mod types;

pub use client::{AuthClient, AuthClientError};
pub use csrf::{CsrfError, CsrfTokenSource};
pub use pkce::PkceChallenge;
pub use token_manager::{TokenManager, TokenManagerError};
pub use traits::{AuthApi, SecureStore};
pub use types::{AuthConfig, TokenResponse, TokenSet, DEFAULT_REFRESH_LEAD};
