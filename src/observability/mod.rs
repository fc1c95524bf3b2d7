//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing via `tracing-subscriber`
//! - OpenTelemetry metrics for merged items, filtered items, and scheduler fires

pub mod metrics;
pub mod tracing;
