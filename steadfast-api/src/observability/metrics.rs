//! Prometheus metrics for the resilience control plane
//!
//! [`PrometheusSink`] forwards control plane records to the `metrics` facade;
//! [`init_metrics`] installs the Prometheus recorder and [`metrics_handler`]
//! serves the scrape endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use axum::{Router, routing::get};
//! use steadfast_api::observability::metrics::{init_metrics, metrics_handler, PrometheusSink};
//! use steadfast_core::DependencyRegistry;
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let registry = DependencyRegistry::default().with_sink(Arc::new(PrometheusSink));
//!
//! let app: Router<()> = Router::new().route("/metrics", get(metrics_handler));
//! ```

use std::sync::OnceLock;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use steadfast_core::{CircuitState, MetricsSink, Outcome, RejectionKind};
use tracing::error;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

const ATTEMPT_BUCKETS: &[f64] = &[1.0, 2.0, 3.0, 4.0, 5.0, 7.0, 10.0];

/// Errors that can occur during metrics operations
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to install metrics exporter: {0}")]
    Installation(String),
}

/// Builds the exporter with the control plane's histogram buckets.
fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .map_err(|e| MetricsError::Installation(e.to_string()))?
        .set_buckets_for_metric(
            Matcher::Full("resilience_operation_attempts".to_string()),
            ATTEMPT_BUCKETS,
        )
        .map_err(|e| MetricsError::Installation(e.to_string()))
}

/// Initializes the metrics system with a Prometheus exporter.
///
/// Subsequent calls return `Ok` without re-initializing.
pub fn init_metrics() -> Result<(), MetricsError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = builder()?
        .install_recorder()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Installation("Handle already set".to_string()))?;

    register_metric_descriptions();
    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(
        "resilience_operations_total",
        Unit::Count,
        "Terminal outcomes of retried operations"
    );
    describe_histogram!(
        "resilience_operation_attempts",
        Unit::Count,
        "Attempts made per retried operation"
    );
    describe_histogram!(
        "resilience_operation_duration_seconds",
        Unit::Seconds,
        "Wall time of retried operations including backoff"
    );
    describe_counter!(
        "circuit_breaker_transitions_total",
        Unit::Count,
        "Circuit breaker state transitions"
    );
    describe_gauge!(
        "circuit_breaker_state",
        "Current breaker state (0 = closed, 1 = half-open, 2 = open)"
    );
    describe_counter!(
        "resilience_rejections_total",
        Unit::Count,
        "Calls turned away without running"
    );
    describe_gauge!(
        "http_requests_in_flight",
        Unit::Count,
        "Number of HTTP requests currently being processed"
    );
}

/// Axum handler that returns Prometheus metrics in text format.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => {
            error!("Metrics handler called but metrics not initialized");
            (StatusCode::INTERNAL_SERVER_ERROR, "Metrics not initialized").into_response()
        }
    }
}

fn state_value(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    }
}

/// [`MetricsSink`] backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn record_operation(&self, name: &str, outcome: Outcome, attempts: u32, duration_seconds: f64) {
        counter!(
            "resilience_operations_total",
            "operation" => name.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        histogram!("resilience_operation_attempts", "operation" => name.to_string())
            .record(f64::from(attempts));
        histogram!(
            "resilience_operation_duration_seconds",
            "operation" => name.to_string(),
            "outcome" => outcome.as_str()
        )
        .record(duration_seconds);
    }

    fn record_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        counter!(
            "circuit_breaker_transitions_total",
            "breaker" => name.to_string(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        gauge!("circuit_breaker_state", "breaker" => name.to_string()).set(state_value(to));
    }

    fn record_rejection(&self, name: &str, kind: RejectionKind) {
        counter!(
            "resilience_rejections_total",
            "dependency" => name.to_string(),
            "reason" => kind.as_str()
        )
        .increment(1);
    }
}

/// Keeps `http_requests_in_flight` raised for as long as it lives.
#[derive(Debug)]
pub struct InFlightGuard(());

impl InFlightGuard {
    pub fn start() -> Self {
        gauge!("http_requests_in_flight").increment(1.0);
        Self(())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("http_requests_in_flight").decrement(1.0);
    }
}
