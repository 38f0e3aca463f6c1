use std::time::Duration;
use thiserror::Error;
use validator::ValidationErrors;

/// Fail-fast rejection raised before an operation is ever invoked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    #[error("bulkhead '{name}' is full")]
    BulkheadFull { name: String },
}

/// Error returned by a guarded operation.
///
/// `Operation` carries an error produced by the wrapped operation that was not
/// retried; `MaxRetriesExceeded` carries the last error once the retry budget
/// ran out. Both expose the original error through [`ResilienceError::into_inner`].
#[derive(Error, Debug)]
pub enum ResilienceError<E> {
    #[error("max retries exceeded after {attempts} attempts: {source}")]
    MaxRetriesExceeded { attempts: u32, source: E },

    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    #[error("bulkhead '{name}' is full")]
    BulkheadFull { name: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Operation(E),
}

impl<E> ResilienceError<E> {
    /// True for errors raised by the control plane without running the operation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::CircuitOpen { .. } | ResilienceError::BulkheadFull { .. }
        )
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, ResilienceError::MaxRetriesExceeded { .. })
    }

    /// Borrows the operation's own error, if there is one.
    pub fn inner(&self) -> Option<&E> {
        match self {
            ResilienceError::MaxRetriesExceeded { source, .. } => Some(source),
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Unwraps the operation's own error, if there is one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            ResilienceError::MaxRetriesExceeded { source, .. } => Some(source),
            ResilienceError::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the operation error type, leaving control plane variants untouched.
    pub fn map_inner<F, O>(self, f: O) -> ResilienceError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            ResilienceError::MaxRetriesExceeded { attempts, source } => {
                ResilienceError::MaxRetriesExceeded {
                    attempts,
                    source: f(source),
                }
            }
            ResilienceError::CircuitOpen { name } => ResilienceError::CircuitOpen { name },
            ResilienceError::BulkheadFull { name } => ResilienceError::BulkheadFull { name },
            ResilienceError::Cancelled => ResilienceError::Cancelled,
            ResilienceError::Operation(e) => ResilienceError::Operation(f(e)),
        }
    }
}

impl<E> From<Rejection> for ResilienceError<E> {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::CircuitOpen { name } => ResilienceError::CircuitOpen { name },
            Rejection::BulkheadFull { name } => ResilienceError::BulkheadFull { name },
        }
    }
}

/// Error returned while waiting for in-flight requests to drain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DrainError {
    #[error("drain timed out after {waited:?} with {active} requests still active")]
    Timeout { waited: Duration, active: i64 },

    #[error("drain wait cancelled with {active} requests still active")]
    Cancelled { active: i64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::Invalid(errors.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;

    #[test]
    fn test_rejection_converts_into_resilience_error() {
        let err: ResilienceError<io::Error> = Rejection::CircuitOpen {
            name: "db".to_string(),
        }
        .into();
        assert!(matches!(err, ResilienceError::CircuitOpen { ref name } if name == "db"));
        assert!(err.is_rejection());

        let err: ResilienceError<io::Error> = Rejection::BulkheadFull {
            name: "pool".to_string(),
        }
        .into();
        assert!(matches!(err, ResilienceError::BulkheadFull { ref name } if name == "pool"));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_exhausted_error_exposes_source() {
        let err = ResilienceError::MaxRetriesExceeded {
            attempts: 3,
            source: io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"),
        };

        let display = err.to_string();
        assert!(display.contains("3 attempts"));
        assert!(display.contains("reset by peer"));

        let source = err.source().expect("source should be set");
        assert_eq!(source.to_string(), "reset by peer");

        let inner = err.into_inner().unwrap();
        assert_eq!(inner.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_operation_error_is_transparent() {
        let err: ResilienceError<io::Error> =
            ResilienceError::Operation(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert_eq!(err.to_string(), "missing");
        assert!(!err.is_exhausted());
        assert_eq!(err.inner().map(io::Error::kind), Some(io::ErrorKind::NotFound));
    }

    #[test]
    fn test_map_inner_preserves_variant() {
        let err: ResilienceError<&str> = ResilienceError::MaxRetriesExceeded {
            attempts: 2,
            source: "boom",
        };
        let mapped = err.map_inner(|e| e.len());
        assert!(matches!(
            mapped,
            ResilienceError::MaxRetriesExceeded {
                attempts: 2,
                source: 4
            }
        ));
    }

    #[test]
    fn test_drain_error_display() {
        let err = DrainError::Timeout {
            waited: Duration::from_millis(100),
            active: 1,
        };
        assert!(err.to_string().contains("1 requests still active"));
    }
}
