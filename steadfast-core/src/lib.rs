//! Resilience control plane primitives.
//!
//! - **Retry**: re-invokes a fallible operation on retryable failure with capped
//!   exponential backoff
//! - **Circuit Breaker**: fails fast while a dependency is deemed unhealthy
//! - **Bulkhead**: caps concurrent in-flight operations against a resource
//! - **Shutdown Coordinator**: tracks in-flight inbound requests and drains them
//!   on shutdown
//!
//! Outbound calls compose as Bulkhead → Circuit Breaker → Retrier through
//! [`Guard`]. The shutdown coordinator wraps the inbound request path instead.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod classify;
pub mod config;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod shutdown;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadPermit, BulkheadStats};
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use classify::{RetryHint, Retryable};
pub use config::ResilienceConfig;
pub use error::{ConfigError, ConfigResult, DrainError, Rejection, ResilienceError};
pub use guard::Guard;
pub use metrics::{MetricsSink, NoopMetricsSink, Outcome, RejectionKind, SharedSink};
pub use registry::{DependencyRegistry, DependencyStatus};
pub use retry::{JitterStrategy, Retrier, RetryPolicy};
pub use shutdown::{RequestGuard, ShutdownConfig, ShutdownCoordinator, ShutdownPhase};

/// Cancellation signal accepted by every suspending operation.
pub use tokio_util::sync::CancellationToken;
