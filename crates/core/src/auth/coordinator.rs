//! Auth retry coordinator: single-flight token refresh with request fan-out.
//!
//! Intercepts authentication failures from in-flight requests, parks them,
//! drives exactly one concurrent token refresh, and replays or fails the
//! parked requests. The coordinator's idle/refreshing gate is the single
//! point of mutual exclusion for token refresh system-wide; the token
//! manager itself is never called concurrently outside this gate.
//!
//! Retry depth is bounded to one auth-triggered replay: a request that fails
//! again after the refresh is surfaced to its original caller, never
//! re-parked.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, instrument, warn};
use waypoint_common::auth::{AuthApi, SecureStore, TokenManager};
use waypoint_domain::constants::{PARKED_REQUEST_CAP, TOKEN_REFRESH_TIMEOUT};
use waypoint_domain::{ApiError, QueuedRequest, Result, TransportResponse};

use crate::sync::ports::Transport;

/// Callback fired when a refresh fails or times out; expected to drive
/// logout / re-login in the shell.
pub type AuthFailedCallback = Arc<dyn Fn() + Send + Sync>;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct AuthRetryConfig {
    /// Capacity of the parked-request queue; 401s beyond it are surfaced
    /// immediately
    pub parked_cap: usize,
    /// Timeout for one refresh attempt
    pub refresh_timeout: Duration,
    /// Path prefixes of authentication endpoints, which are never parked
    pub auth_path_prefixes: Vec<String>,
}

impl Default for AuthRetryConfig {
    fn default() -> Self {
        Self {
            parked_cap: PARKED_REQUEST_CAP,
            refresh_timeout: TOKEN_REFRESH_TIMEOUT,
            auth_path_prefixes: vec!["/api/auth".to_string()],
        }
    }
}

/// An in-flight request parked while a refresh is underway.
struct PendingAuthRequest {
    request: QueuedRequest,
    responder: oneshot::Sender<Result<TransportResponse>>,
}

/// Idle/refreshing gate plus the parked-request queue.
#[derive(Default)]
struct CoordinatorState {
    refreshing: bool,
    parked: Vec<PendingAuthRequest>,
}

/// Auth retry coordinator.
pub struct AuthRetryCoordinator<A: AuthApi + 'static, S: SecureStore + 'static> {
    token_manager: Arc<TokenManager<A, S>>,
    transport: Arc<dyn Transport>,
    config: AuthRetryConfig,
    state: Mutex<CoordinatorState>,
    on_auth_failed: Option<AuthFailedCallback>,
}

impl<A: AuthApi + 'static, S: SecureStore + 'static> AuthRetryCoordinator<A, S> {
    /// Create a new coordinator.
    pub fn new(
        token_manager: Arc<TokenManager<A, S>>,
        transport: Arc<dyn Transport>,
        config: AuthRetryConfig,
    ) -> Self {
        Self {
            token_manager,
            transport,
            config,
            state: Mutex::new(CoordinatorState::default()),
            on_auth_failed: None,
        }
    }

    /// Register the callback fired after a failed or timed-out refresh.
    #[must_use]
    pub fn with_auth_failed_callback(mut self, callback: AuthFailedCallback) -> Self {
        self.on_auth_failed = Some(callback);
        self
    }

    /// Handle a 401 observed on an in-flight request.
    ///
    /// Non-auth requests are parked while exactly one refresh runs; on
    /// success every parked request is replayed in enqueue order with the
    /// new credentials, on failure every parked request is rejected.
    /// Authentication endpoints themselves are surfaced directly so a 401
    /// on the refresh path cannot trigger an infinite refresh loop.
    #[instrument(skip_all, fields(path = %request.path))]
    pub async fn handle_auth_failure(
        &self,
        request: QueuedRequest,
    ) -> Result<TransportResponse> {
        if self.is_auth_endpoint(&request.path) {
            debug!("401 on auth endpoint surfaced directly");
            return Err(ApiError::Auth("authentication failed".to_string()));
        }

        let (rx, drives_refresh) = {
            let mut state = self.state.lock().await;

            if state.parked.len() >= self.config.parked_cap {
                warn!(
                    parked = state.parked.len(),
                    capacity = self.config.parked_cap,
                    "Parked-request queue full; surfacing auth failure"
                );
                return Err(ApiError::Auth(
                    "authentication retry queue is full".to_string(),
                ));
            }

            let (tx, rx) = oneshot::channel();
            state.parked.push(PendingAuthRequest { request, responder: tx });

            let drives_refresh = !state.refreshing;
            if drives_refresh {
                state.refreshing = true;
            }
            (rx, drives_refresh)
        };

        if drives_refresh {
            self.run_refresh_cycle().await;
        }

        rx.await
            .map_err(|_| ApiError::Internal("auth coordinator dropped the request".to_string()))?
    }

    /// Whether a refresh is currently in flight.
    pub async fn is_refreshing(&self) -> bool {
        self.state.lock().await.refreshing
    }

    /// Number of currently parked requests.
    pub async fn parked_count(&self) -> usize {
        self.state.lock().await.parked.len()
    }

    /// Drop all parked requests without replay (explicit logout path).
    ///
    /// Each parked caller is unblocked with an authentication failure.
    pub async fn clear_queue(&self) -> usize {
        let parked = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.parked)
        };

        let count = parked.len();
        for pending in parked {
            let _ = pending
                .responder
                .send(Err(ApiError::Auth("authentication queue cleared".to_string())));
        }
        if count > 0 {
            info!(count, "Cleared parked auth requests");
        }
        count
    }

    /// Run the single refresh and resolve every parked request.
    async fn run_refresh_cycle(&self) {
        info!("Starting single-flight token refresh");

        let refresh_result = tokio::time::timeout(
            self.config.refresh_timeout,
            self.token_manager.refresh(),
        )
        .await;

        let parked = {
            let mut state = self.state.lock().await;
            state.refreshing = false;
            std::mem::take(&mut state.parked)
        };

        match refresh_result {
            Ok(Ok(())) => {
                info!(parked = parked.len(), "Refresh succeeded; replaying parked requests");
                self.replay_parked(parked).await;
            }
            Ok(Err(e)) => {
                warn!(error = %e, parked = parked.len(), "Refresh failed; rejecting parked requests");
                self.reject_parked(parked);
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.refresh_timeout.as_secs(),
                    parked = parked.len(),
                    "Refresh timed out; rejecting parked requests"
                );
                self.reject_parked(parked);
            }
        }
    }

    /// Replay parked requests in enqueue order with the new credentials.
    async fn replay_parked(&self, parked: Vec<PendingAuthRequest>) {
        let access_token = match self.token_manager.access_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "No access token after refresh; rejecting parked requests");
                self.reject_parked(parked);
                return;
            }
        };

        for pending in parked {
            let request = pending
                .request
                .with_header("Authorization", format!("Bearer {access_token}"));

            let result = match self.transport.execute(&request).await {
                Ok(response) if response.is_success() => Ok(response),
                // A replay that fails again is surfaced, never re-parked.
                Ok(response) => {
                    Err(ApiError::from_status(response.status, response.error_message()))
                }
                Err(e) => Err(e),
            };

            let _ = pending.responder.send(result);
        }
    }

    /// Reject every parked request and fire the auth-failed callback.
    fn reject_parked(&self, parked: Vec<PendingAuthRequest>) {
        for pending in parked {
            let _ = pending.responder.send(Err(ApiError::Auth(
                "token refresh failed; please sign in again".to_string(),
            )));
        }

        if let Some(callback) = &self.on_auth_failed {
            callback();
        }
    }

    fn is_auth_endpoint(&self, path: &str) -> bool {
        self.config.auth_path_prefixes.iter().any(|prefix| path.starts_with(prefix))
    }
}
