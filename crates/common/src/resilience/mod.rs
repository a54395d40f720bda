//! Resilience patterns for the sync core.
//!
//! Provides per-endpoint error metrics with circuit breaking, and the clock
//! abstraction that makes window behavior deterministically testable.

pub mod clock;
pub mod error_metrics;

pub use clock::{Clock, MockClock, SystemClock};
pub use error_metrics::{
    EndpointSnapshot, ErrorMetrics, ErrorMetricsConfig, ErrorMetricsConfigBuilder,
};
