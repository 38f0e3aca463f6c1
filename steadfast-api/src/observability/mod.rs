//! Observability for the resilience control plane
//!
//! - Structured logging through `tracing-subscriber` (JSON, pretty or compact)
//! - Prometheus metrics export and a [`MetricsSink`](steadfast_core::MetricsSink)
//!   backed by the `metrics` facade
//! - Liveness and readiness probes driven by the shutdown phase

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{liveness_handler, readiness_handler, HealthResponse};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{init_metrics, metrics_handler, InFlightGuard, MetricsError, PrometheusSink};
