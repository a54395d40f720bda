//! Per-endpoint error metrics and circuit breaking.
//!
//! Tracks request volume and a bounded sliding window of error timestamps
//! per `endpoint:status` pair, and derives per-endpoint circuit state from
//! them. The circuit opens only after a minimum request volume is observed
//! (avoids single-failure false positives) and auto-resets to closed once
//! the evaluation window has elapsed since opening; a single success closes
//! an open circuit immediately.

use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};

/// Status-code key used for transport-level failures that never produced an
/// HTTP response.
pub const TRANSPORT_ERROR_STATUS: u16 = 0;

/// Simple configuration error for validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration for the error metrics service
#[derive(Debug, Clone)]
pub struct ErrorMetricsConfig {
    /// Minimum request volume before a circuit may open
    pub min_volume: u64,
    /// Windowed error rate above which a circuit opens
    pub error_threshold: f64,
    /// Evaluation window; an open circuit auto-closes after this long
    pub evaluation_window: Duration,
    /// Maximum entries kept in one endpoint:status error window
    pub window_cap: usize,
}

impl Default for ErrorMetricsConfig {
    fn default() -> Self {
        Self {
            min_volume: 5,
            error_threshold: 0.5,
            evaluation_window: Duration::from_secs(60),
            window_cap: 100,
        }
    }
}

impl ErrorMetricsConfig {
    /// Create a configuration builder
    pub fn builder() -> ErrorMetricsConfigBuilder {
        ErrorMetricsConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_volume == 0 {
            return Err(ConfigError::Invalid {
                message: "min_volume must be greater than 0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.error_threshold) {
            return Err(ConfigError::Invalid {
                message: "error_threshold must be within [0, 1]".to_string(),
            });
        }

        if self.evaluation_window.is_zero() {
            return Err(ConfigError::Invalid {
                message: "evaluation_window must be greater than 0".to_string(),
            });
        }

        if self.window_cap == 0 {
            return Err(ConfigError::Invalid {
                message: "window_cap must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for [`ErrorMetricsConfig`]
#[derive(Debug, Default)]
pub struct ErrorMetricsConfigBuilder {
    config: ErrorMetricsConfig,
}

impl ErrorMetricsConfigBuilder {
    pub fn new() -> Self {
        Self { config: ErrorMetricsConfig::default() }
    }

    pub fn min_volume(mut self, volume: u64) -> Self {
        self.config.min_volume = volume;
        self
    }

    pub fn error_threshold(mut self, threshold: f64) -> Self {
        self.config.error_threshold = threshold;
        self
    }

    pub fn evaluation_window(mut self, window: Duration) -> Self {
        self.config.evaluation_window = window;
        self
    }

    pub fn window_cap(mut self, cap: usize) -> Self {
        self.config.window_cap = cap;
        self
    }

    pub fn build(self) -> ConfigResult<ErrorMetricsConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-endpoint rolling counters and circuit state
#[derive(Debug, Default, Clone)]
struct EndpointState {
    total_requests: u64,
    last_request_at: Option<Instant>,
    circuit_open: bool,
    opened_at: Option<Instant>,
}

/// Point-in-time view of one endpoint for observability
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub total_requests: u64,
    pub windowed_errors: usize,
    pub circuit_open: bool,
}

#[derive(Debug, Default)]
struct MetricsState {
    /// Rolling request counters and circuit state, keyed by endpoint
    endpoints: HashMap<String, EndpointState>,
    /// Bounded sliding windows of error instants, keyed by endpoint:status
    windows: HashMap<String, VecDeque<Instant>>,
}

/// Per-endpoint error metrics service with circuit breaking
///
/// All state is in-memory and lives for the process lifetime; it resets on
/// restart or explicit [`ErrorMetrics::reset_all`].
pub struct ErrorMetrics<C: Clock = SystemClock> {
    config: ErrorMetricsConfig,
    state: RwLock<MetricsState>,
    clock: C,
}

impl ErrorMetrics<SystemClock> {
    /// Create a new service with the given configuration using the system
    /// clock
    pub fn new(config: ErrorMetricsConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a service with default configuration (convenience method)
    pub fn with_defaults() -> Self {
        Self { config: ErrorMetricsConfig::default(), state: RwLock::new(MetricsState::default()), clock: SystemClock }
    }
}

impl<C: Clock> ErrorMetrics<C> {
    /// Create a new service with a custom clock (useful for testing)
    pub fn with_clock(config: ErrorMetricsConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, state: RwLock::new(MetricsState::default()), clock })
    }

    /// Record one request attempt against an endpoint.
    ///
    /// Called for every attempt regardless of outcome.
    pub fn record_request(&self, endpoint: &str) {
        let now = self.clock.now();
        let mut state = self.write_state();
        let entry = state.endpoints.entry(endpoint.to_string()).or_default();
        entry.total_requests += 1;
        entry.last_request_at = Some(now);
    }

    /// Record an error response for an endpoint, then evaluate whether the
    /// circuit should open.
    ///
    /// Use [`TRANSPORT_ERROR_STATUS`] for transport-level failures that never
    /// produced an HTTP status.
    pub fn record_error(&self, endpoint: &str, status_code: u16) {
        let now = self.clock.now();
        let mut state = self.write_state();

        let window = state
            .windows
            .entry(format!("{endpoint}:{status_code}"))
            .or_insert_with(VecDeque::new);
        window.push_back(now);
        while window.len() > self.config.window_cap {
            window.pop_front();
        }

        self.evaluate_circuit(&mut state, endpoint, now);
    }

    /// Record a successful request.
    ///
    /// Counts the request and, if the circuit was open, closes it
    /// immediately (optimistic recovery — no formal probe count).
    pub fn record_success(&self, endpoint: &str) {
        let now = self.clock.now();
        let mut state = self.write_state();
        let entry = state.endpoints.entry(endpoint.to_string()).or_default();
        entry.total_requests += 1;
        entry.last_request_at = Some(now);

        if entry.circuit_open {
            entry.circuit_open = false;
            entry.opened_at = None;
            info!(endpoint, "Circuit closed after successful request");
        }
    }

    /// Whether the circuit for an endpoint is currently open.
    ///
    /// If the evaluation window has elapsed since the circuit opened, the
    /// circuit auto-closes as a side effect of this check and the method
    /// returns false (half-open semantics collapse into "closed").
    pub fn is_circuit_open(&self, endpoint: &str) -> bool {
        let now = self.clock.now();

        let needs_close = {
            let state = self.read_state();
            match state.endpoints.get(endpoint) {
                Some(entry) if entry.circuit_open => match entry.opened_at {
                    Some(opened_at) => {
                        now.duration_since(opened_at) >= self.config.evaluation_window
                    }
                    None => true,
                },
                _ => return false,
            }
        };

        if needs_close {
            let mut state = self.write_state();
            if let Some(entry) = state.endpoints.get_mut(endpoint) {
                entry.circuit_open = false;
                entry.opened_at = None;
                info!(endpoint, "Circuit auto-closed after evaluation window");
            }
            return false;
        }

        true
    }

    /// Error rate for an endpoint over the given window, in `[0, 1]`.
    ///
    /// The numerator is the number of errors observed within `window` across
    /// all status codes for the endpoint; the denominator is the *lifetime*
    /// request count for the endpoint, not a windowed one. Callers comparing
    /// rates across long-lived endpoints must account for this.
    pub fn error_rate(&self, endpoint: &str, window: Duration) -> f64 {
        let now = self.clock.now();
        let state = self.read_state();

        let total = state.endpoints.get(endpoint).map_or(0, |entry| entry.total_requests);
        if total == 0 {
            return 0.0;
        }

        let errors = Self::errors_in_window(&state, endpoint, window, now);
        errors as f64 / total as f64
    }

    /// Point-in-time view of one endpoint, or `None` if it was never seen.
    pub fn snapshot(&self, endpoint: &str) -> Option<EndpointSnapshot> {
        let now = self.clock.now();
        let state = self.read_state();
        let entry = state.endpoints.get(endpoint)?;
        Some(EndpointSnapshot {
            total_requests: entry.total_requests,
            windowed_errors: Self::errors_in_window(
                &state,
                endpoint,
                self.config.evaluation_window,
                now,
            ),
            circuit_open: entry.circuit_open,
        })
    }

    /// Drop all recorded state for one endpoint.
    pub fn reset(&self, endpoint: &str) {
        let mut state = self.write_state();
        state.endpoints.remove(endpoint);
        let prefix = format!("{endpoint}:");
        state.windows.retain(|key, _| !key.starts_with(&prefix));
        debug!(endpoint, "Endpoint metrics reset");
    }

    /// Drop all recorded state.
    pub fn reset_all(&self) {
        let mut state = self.write_state();
        state.endpoints.clear();
        state.windows.clear();
        info!("All endpoint metrics reset");
    }

    /// Count errors for an endpoint within `window`, across all status codes.
    fn errors_in_window(
        state: &MetricsState,
        endpoint: &str,
        window: Duration,
        now: Instant,
    ) -> usize {
        let prefix = format!("{endpoint}:");
        state
            .windows
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .flat_map(|(_, timestamps)| timestamps.iter())
            .filter(|ts| now.duration_since(**ts) <= window)
            .count()
    }

    /// Open the circuit when the dual condition holds: volume at or above
    /// the minimum AND windowed error rate above the threshold.
    fn evaluate_circuit(&self, state: &mut MetricsState, endpoint: &str, now: Instant) {
        let total = state.endpoints.get(endpoint).map_or(0, |entry| entry.total_requests);
        if total < self.config.min_volume {
            return;
        }

        let errors = Self::errors_in_window(state, endpoint, self.config.evaluation_window, now);
        let rate = errors as f64 / total as f64;
        if rate <= self.config.error_threshold {
            return;
        }

        let entry = state.endpoints.entry(endpoint.to_string()).or_default();
        if !entry.circuit_open {
            entry.circuit_open = true;
            entry.opened_at = Some(now);
            warn!(
                endpoint,
                total_requests = total,
                windowed_errors = errors,
                "Circuit opened"
            );
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, MetricsState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Error metrics state lock poisoned during read");
                poisoned.into_inner()
            }
        }
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, MetricsState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Error metrics state lock poisoned during write");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for ErrorMetrics<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for error metrics and circuit breaking.
    //!
    //! Tests cover the dual opening condition, minimum-volume protection,
    //! optimistic recovery, window expiry, and the documented lifetime
    //! denominator of `error_rate`.

    use super::super::clock::MockClock;
    use super::*;

    fn metrics_with_clock(config: ErrorMetricsConfig) -> (ErrorMetrics<MockClock>, MockClock) {
        let clock = MockClock::new();
        let metrics = ErrorMetrics::with_clock(config, clock.clone()).unwrap();
        (metrics, clock)
    }

    /// Validates `ErrorMetricsConfig::default` values.
    #[test]
    fn test_config_default() {
        let config = ErrorMetricsConfig::default();
        assert_eq!(config.min_volume, 5);
        assert!((config.error_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.evaluation_window, Duration::from_secs(60));
        assert_eq!(config.window_cap, 100);
    }

    /// Validates configuration validation rejects out-of-range values.
    #[test]
    fn test_config_validation() {
        assert!(ErrorMetricsConfig::builder().min_volume(0).build().is_err());
        assert!(ErrorMetricsConfig::builder().error_threshold(1.5).build().is_err());
        assert!(ErrorMetricsConfig::builder()
            .evaluation_window(Duration::ZERO)
            .build()
            .is_err());
        assert!(ErrorMetricsConfig::builder().window_cap(0).build().is_err());
        assert!(ErrorMetricsConfig::builder().min_volume(3).build().is_ok());
    }

    /// Scenario from the drain contract: endpoint `/orders` receives 3
    /// requests and 3 consecutive 500s with min volume 3 and threshold 0.5.
    ///
    /// Assertions:
    /// - Circuit opens after the third error.
    /// - `is_circuit_open("/orders")` returns true immediately after.
    #[test]
    fn test_circuit_opens_at_volume_and_rate() {
        let config = ErrorMetricsConfig::builder().min_volume(3).error_threshold(0.5).build().unwrap();
        let (metrics, _clock) = metrics_with_clock(config);

        for _ in 0..3 {
            metrics.record_request("/orders");
            metrics.record_error("/orders", 500);
        }

        assert!(metrics.is_circuit_open("/orders"));
    }

    /// Validates the circuit never opens below the minimum volume, even at a
    /// 100% error rate.
    #[test]
    fn test_circuit_never_opens_below_min_volume() {
        let config = ErrorMetricsConfig::builder().min_volume(5).error_threshold(0.5).build().unwrap();
        let (metrics, _clock) = metrics_with_clock(config);

        for _ in 0..4 {
            metrics.record_request("/orders");
            metrics.record_error("/orders", 500);
        }

        assert!(!metrics.is_circuit_open("/orders"));
    }

    /// Validates the circuit stays closed while the windowed rate is at or
    /// below the threshold.
    #[test]
    fn test_circuit_stays_closed_below_threshold() {
        let config = ErrorMetricsConfig::builder().min_volume(3).error_threshold(0.5).build().unwrap();
        let (metrics, _clock) = metrics_with_clock(config);

        for _ in 0..8 {
            metrics.record_request("/orders");
        }
        for _ in 0..4 {
            metrics.record_error("/orders", 500);
        }

        // 4 windowed errors over 8 lifetime requests = 0.5, not above the
        // threshold
        assert!(!metrics.is_circuit_open("/orders"));
    }

    /// Validates `record_success` on an open circuit closes it immediately.
    #[test]
    fn test_success_closes_open_circuit() {
        let config = ErrorMetricsConfig::builder().min_volume(3).error_threshold(0.5).build().unwrap();
        let (metrics, _clock) = metrics_with_clock(config);

        for _ in 0..3 {
            metrics.record_request("/orders");
            metrics.record_error("/orders", 500);
        }
        assert!(metrics.is_circuit_open("/orders"));

        metrics.record_success("/orders");
        assert!(!metrics.is_circuit_open("/orders"));
    }

    /// Validates an open circuit auto-closes once the evaluation window has
    /// elapsed, as a side effect of `is_circuit_open`.
    #[test]
    fn test_circuit_auto_closes_after_window() {
        let config = ErrorMetricsConfig::builder()
            .min_volume(3)
            .error_threshold(0.5)
            .evaluation_window(Duration::from_secs(60))
            .build()
            .unwrap();
        let (metrics, clock) = metrics_with_clock(config);

        for _ in 0..3 {
            metrics.record_request("/orders");
            metrics.record_error("/orders", 500);
        }
        assert!(metrics.is_circuit_open("/orders"));

        clock.advance(Duration::from_secs(30));
        assert!(metrics.is_circuit_open("/orders"), "Window not yet elapsed");

        clock.advance(Duration::from_secs(31));
        assert!(!metrics.is_circuit_open("/orders"), "Window elapsed, circuit auto-closes");
        // The close is sticky, not a transient read
        assert!(!metrics.is_circuit_open("/orders"));
    }

    /// Validates the documented lifetime denominator: windowed errors divided
    /// by lifetime request count.
    #[test]
    fn test_error_rate_lifetime_denominator() {
        let (metrics, _clock) = metrics_with_clock(ErrorMetricsConfig::default());

        for _ in 0..10 {
            metrics.record_request("/orders");
        }
        metrics.record_error("/orders", 500);
        metrics.record_error("/orders", 503);

        let rate = metrics.error_rate("/orders", Duration::from_secs(60));
        assert!((rate - 0.2).abs() < f64::EPSILON);
    }

    /// Validates errors outside the window are excluded from the rate.
    #[test]
    fn test_error_rate_excludes_old_errors() {
        let (metrics, clock) = metrics_with_clock(ErrorMetricsConfig::default());

        metrics.record_request("/orders");
        metrics.record_error("/orders", 500);

        clock.advance(Duration::from_secs(120));
        let rate = metrics.error_rate("/orders", Duration::from_secs(60));
        assert!(rate.abs() < f64::EPSILON);
    }

    /// Validates the sliding window drops the oldest entries beyond the cap.
    #[test]
    fn test_window_cap_eviction() {
        let config = ErrorMetricsConfig::builder()
            .min_volume(1000) // keep the circuit out of the way
            .window_cap(3)
            .build()
            .unwrap();
        let (metrics, _clock) = metrics_with_clock(config);

        for _ in 0..5 {
            metrics.record_request("/orders");
            metrics.record_error("/orders", 500);
        }

        let snapshot = metrics.snapshot("/orders").unwrap();
        assert_eq!(snapshot.windowed_errors, 3);
        assert_eq!(snapshot.total_requests, 5);
    }

    /// Validates transport failures are tracked under the reserved status
    /// key and count toward the rate.
    #[test]
    fn test_transport_errors_count_toward_rate() {
        let config = ErrorMetricsConfig::builder().min_volume(2).error_threshold(0.5).build().unwrap();
        let (metrics, _clock) = metrics_with_clock(config);

        for _ in 0..2 {
            metrics.record_request("/orders");
            metrics.record_error("/orders", TRANSPORT_ERROR_STATUS);
        }

        assert!(metrics.is_circuit_open("/orders"));
    }

    /// Validates unknown endpoints report closed circuits and zero rates.
    #[test]
    fn test_unknown_endpoint() {
        let (metrics, _clock) = metrics_with_clock(ErrorMetricsConfig::default());
        assert!(!metrics.is_circuit_open("/never-seen"));
        assert!(metrics.error_rate("/never-seen", Duration::from_secs(60)).abs() < f64::EPSILON);
        assert!(metrics.snapshot("/never-seen").is_none());
    }

    /// Validates per-endpoint reset clears counters and windows.
    #[test]
    fn test_reset_endpoint() {
        let config = ErrorMetricsConfig::builder().min_volume(2).error_threshold(0.5).build().unwrap();
        let (metrics, _clock) = metrics_with_clock(config);

        for _ in 0..2 {
            metrics.record_request("/orders");
            metrics.record_error("/orders", 500);
        }
        metrics.record_request("/profile");
        assert!(metrics.is_circuit_open("/orders"));

        metrics.reset("/orders");
        assert!(!metrics.is_circuit_open("/orders"));
        assert!(metrics.snapshot("/orders").is_none());
        // Unrelated endpoints keep their state
        assert_eq!(metrics.snapshot("/profile").unwrap().total_requests, 1);
    }

    /// Validates endpoints are tracked independently.
    #[test]
    fn test_endpoints_are_independent() {
        let config = ErrorMetricsConfig::builder().min_volume(2).error_threshold(0.5).build().unwrap();
        let (metrics, _clock) = metrics_with_clock(config);

        for _ in 0..2 {
            metrics.record_request("/orders");
            metrics.record_error("/orders", 500);
        }
        metrics.record_request("/profile");
        metrics.record_success("/profile");

        assert!(metrics.is_circuit_open("/orders"));
        assert!(!metrics.is_circuit_open("/profile"));
    }
}
