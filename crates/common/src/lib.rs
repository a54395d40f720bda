//! # Waypoint Common
//!
//! Cross-cutting concerns for the Waypoint sync core.
//!
//! This crate contains:
//! - Resilience primitives (per-endpoint error metrics and circuit breaking)
//! - Auth building blocks (token lifecycle, CSRF token source, PKCE)
//!
//! ## Architecture
//! - No dependencies on other Waypoint crates
//! - Application services in `waypoint-core` compose these pieces with the
//!   domain model

pub mod auth;
pub mod resilience;
