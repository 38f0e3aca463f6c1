//! Metrics sink interface the control plane reports to.
//!
//! The primitives never talk to a metrics backend directly. They emit records
//! to a [`MetricsSink`]; [`NoopMetricsSink`] is used until the host wires in a
//! real one (see `steadfast-api` for the Prometheus-backed sink).

use std::fmt;
use std::sync::Arc;

use crate::circuit_breaker::CircuitState;

/// Terminal outcome of a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The operation eventually returned `Ok`.
    Success,
    /// The operation failed with an error that was not retried.
    Failure,
    /// Every permitted attempt failed with a retryable error.
    Exhausted,
    /// The caller cancelled while waiting between attempts.
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Exhausted => "exhausted",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a call was turned away without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    CircuitOpen,
    BulkheadFull,
    QueueTimeout,
    Cancelled,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::CircuitOpen => "circuit_open",
            RejectionKind::BulkheadFull => "bulkhead_full",
            RejectionKind::QueueTimeout => "queue_timeout",
            RejectionKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability the control plane emits telemetry to.
///
/// Implementations must be cheap and non-blocking: the circuit breaker calls
/// [`MetricsSink::record_transition`] while holding its state lock.
pub trait MetricsSink: Send + Sync {
    /// One record per terminal outcome of a retried operation.
    fn record_operation(&self, name: &str, outcome: Outcome, attempts: u32, duration_seconds: f64);

    fn record_transition(&self, _name: &str, _from: CircuitState, _to: CircuitState) {}

    fn record_rejection(&self, _name: &str, _kind: RejectionKind) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_operation(&self, _name: &str, _outcome: Outcome, _attempts: u32, _duration_seconds: f64) {}
}

impl<S: MetricsSink + ?Sized> MetricsSink for Arc<S> {
    fn record_operation(&self, name: &str, outcome: Outcome, attempts: u32, duration_seconds: f64) {
        (**self).record_operation(name, outcome, attempts, duration_seconds)
    }

    fn record_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        (**self).record_transition(name, from, to)
    }

    fn record_rejection(&self, name: &str, kind: RejectionKind) {
        (**self).record_rejection(name, kind)
    }
}

/// Shared handle to the process metrics sink.
pub type SharedSink = Arc<dyn MetricsSink>;

pub fn noop_sink() -> SharedSink {
    Arc::new(NoopMetricsSink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Outcome::Success, "success")]
    #[case(Outcome::Failure, "failure")]
    #[case(Outcome::Exhausted, "exhausted")]
    #[case(Outcome::Cancelled, "cancelled")]
    fn test_outcome_labels(#[case] outcome: Outcome, #[case] label: &str) {
        assert_eq!(outcome.as_str(), label);
        assert_eq!(outcome.to_string(), label);
    }

    #[test]
    fn test_noop_sink_accepts_all_records() {
        let sink = noop_sink();
        sink.record_operation("db", Outcome::Success, 1, 0.01);
        sink.record_transition("db", CircuitState::Closed, CircuitState::Open);
        sink.record_rejection("db", RejectionKind::BulkheadFull);
    }
}
