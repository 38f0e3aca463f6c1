//! Retry classification for operation errors.
//!
//! The retrier asks an error for a [`RetryHint`] through the [`Retryable`]
//! trait. Errors that carry no hint are retried; cancellation and explicit
//! "do not retry" hints are not.

use std::error::Error;
use std::io;

use tokio::time::error::Elapsed;

use crate::error::{Rejection, ResilienceError};

/// What an error says about retrying the operation that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// The caller gave up. Never retried.
    Cancelled,
    /// A deadline elapsed. Retried.
    DeadlineExceeded,
    /// The error is known to be transient.
    Retry,
    /// The error is known to be permanent.
    DoNotRetry,
    /// The error carries no hint. Retried.
    Unspecified,
}

impl RetryHint {
    pub fn is_retryable(self) -> bool {
        !matches!(self, RetryHint::Cancelled | RetryHint::DoNotRetry)
    }
}

/// Errors that can tell the retrier whether another attempt makes sense.
///
/// The default implementation returns [`RetryHint::Unspecified`], so
/// `impl Retryable for MyError {}` opts a type into "retry everything".
pub trait Retryable {
    fn retry_hint(&self) -> RetryHint {
        RetryHint::Unspecified
    }
}

/// Default retry predicate used by [`crate::retry::Retrier::retry`].
pub fn is_retryable<E: Retryable + ?Sized>(error: &E) -> bool {
    error.retry_hint().is_retryable()
}

impl Retryable for io::Error {
    fn retry_hint(&self) -> RetryHint {
        match self.kind() {
            io::ErrorKind::TimedOut => RetryHint::DeadlineExceeded,
            io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => RetryHint::Retry,
            io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::InvalidData
            | io::ErrorKind::Unsupported => RetryHint::DoNotRetry,
            _ => RetryHint::Unspecified,
        }
    }
}

impl Retryable for Elapsed {
    fn retry_hint(&self) -> RetryHint {
        RetryHint::DeadlineExceeded
    }
}

impl Retryable for Rejection {
    fn retry_hint(&self) -> RetryHint {
        match self {
            Rejection::CircuitOpen { .. } => RetryHint::DoNotRetry,
            Rejection::BulkheadFull { .. } => RetryHint::Retry,
        }
    }
}

impl<E: Retryable> Retryable for ResilienceError<E> {
    fn retry_hint(&self) -> RetryHint {
        match self {
            ResilienceError::Operation(e) => e.retry_hint(),
            ResilienceError::MaxRetriesExceeded { .. } => RetryHint::DoNotRetry,
            ResilienceError::CircuitOpen { .. } => RetryHint::DoNotRetry,
            ResilienceError::BulkheadFull { .. } => RetryHint::Retry,
            ResilienceError::Cancelled => RetryHint::Cancelled,
        }
    }
}

impl Retryable for Box<dyn Error + Send + Sync> {
    fn retry_hint(&self) -> RetryHint {
        hint_from_dyn(&**self)
    }
}

/// Walks an error's source chain looking for a type that carries a hint.
pub fn hint_from_dyn(error: &(dyn Error + 'static)) -> RetryHint {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return io_err.retry_hint();
        }
        if err.is::<Elapsed>() {
            return RetryHint::DeadlineExceeded;
        }
        if let Some(rejection) = err.downcast_ref::<Rejection>() {
            return rejection.retry_hint();
        }
        current = err.source();
    }
    RetryHint::Unspecified
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fmt;
    use std::time::Duration;

    #[derive(Debug)]
    struct Wrapped(io::Error);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped: {}", self.0)
        }
    }

    impl Error for Wrapped {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    #[rstest]
    #[case(io::ErrorKind::TimedOut, RetryHint::DeadlineExceeded)]
    #[case(io::ErrorKind::ConnectionReset, RetryHint::Retry)]
    #[case(io::ErrorKind::NotFound, RetryHint::DoNotRetry)]
    #[case(io::ErrorKind::Other, RetryHint::Unspecified)]
    fn test_io_error_hints(#[case] kind: io::ErrorKind, #[case] expected: RetryHint) {
        assert_eq!(io::Error::new(kind, "x").retry_hint(), expected);
    }

    #[test]
    fn test_default_predicate() {
        assert!(RetryHint::Unspecified.is_retryable());
        assert!(RetryHint::DeadlineExceeded.is_retryable());
        assert!(RetryHint::Retry.is_retryable());
        assert!(!RetryHint::Cancelled.is_retryable());
        assert!(!RetryHint::DoNotRetry.is_retryable());
    }

    #[tokio::test]
    async fn test_elapsed_is_deadline_exceeded() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        assert_eq!(elapsed.retry_hint(), RetryHint::DeadlineExceeded);
    }

    #[test]
    fn test_boxed_error_walks_source_chain() {
        let boxed: Box<dyn Error + Send + Sync> = Box::new(Wrapped(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied",
        )));
        assert_eq!(boxed.retry_hint(), RetryHint::DoNotRetry);

        let opaque: Box<dyn Error + Send + Sync> = "plain message".into();
        assert_eq!(opaque.retry_hint(), RetryHint::Unspecified);
    }

    #[test]
    fn test_rejection_hints() {
        assert!(is_retryable(&Rejection::BulkheadFull {
            name: "x".to_string()
        }));
        assert!(!is_retryable(&Rejection::CircuitOpen {
            name: "x".to_string()
        }));
    }

    #[test]
    fn test_resilience_error_delegates_to_operation() {
        let err: ResilienceError<io::Error> =
            ResilienceError::Operation(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert_eq!(err.retry_hint(), RetryHint::Retry);
    }
}
