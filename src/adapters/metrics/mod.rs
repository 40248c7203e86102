//! Metrics and Monitoring Adapters
//!
//! Provides the Prometheus registry rendered at `/metrics` and the
//! liveness/readiness state behind `/live` and `/ready`.

pub mod health;
pub mod prometheus;

pub use health::HealthState;
pub use prometheus::ServiceMetrics;
