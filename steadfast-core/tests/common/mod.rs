#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use steadfast_core::{CircuitState, MetricsSink, Outcome, RejectionKind, RetryHint, Retryable};

// ===== Test Helper Types =====

/// Operation record captured by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    pub name: String,
    pub outcome: Outcome,
    pub attempts: u32,
    pub duration_seconds: f64,
}

/// Metrics sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    operations: Mutex<Vec<OperationRecord>>,
    transitions: Mutex<Vec<(String, CircuitState, CircuitState)>>,
    rejections: Mutex<Vec<(String, RejectionKind)>>,
}

impl RecordingSink {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn operations(&self) -> Vec<OperationRecord> {
        self.operations.lock().unwrap().clone()
    }

    pub fn transitions(&self) -> Vec<(String, CircuitState, CircuitState)> {
        self.transitions.lock().unwrap().clone()
    }

    pub fn rejections(&self) -> Vec<(String, RejectionKind)> {
        self.rejections.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingSink {
    fn record_operation(&self, name: &str, outcome: Outcome, attempts: u32, duration_seconds: f64) {
        self.operations.lock().unwrap().push(OperationRecord {
            name: name.to_string(),
            outcome,
            attempts,
            duration_seconds,
        });
    }

    fn record_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        self.transitions
            .lock()
            .unwrap()
            .push((name.to_string(), from, to));
    }

    fn record_rejection(&self, name: &str, kind: RejectionKind) {
        self.rejections.lock().unwrap().push((name.to_string(), kind));
    }
}

/// Error type with an explicit retry classification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TestError {
    #[error("transient failure {0}")]
    Transient(u32),
    #[error("permanent failure")]
    Permanent,
}

impl Retryable for TestError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            TestError::Transient(_) => RetryHint::Retry,
            TestError::Permanent => RetryHint::DoNotRetry,
        }
    }
}
