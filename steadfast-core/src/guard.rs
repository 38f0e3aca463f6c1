//! Composition of the outbound primitives.
//!
//! A [`Guard`] nests the primitives from outer to inner as
//! Bulkhead → Circuit Breaker → Retrier: concurrency is capped first, health is
//! checked second, and only permitted attempts are retried. The breaker sees one
//! outcome per guarded call, not one per retry attempt.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bulkhead::Bulkhead;
use crate::circuit_breaker::CircuitBreaker;
use crate::classify::{self, Retryable};
use crate::error::ResilienceError;
use crate::retry::Retrier;

/// Wraps outbound calls to one dependency with any subset of the primitives.
#[derive(Debug, Clone, Default)]
pub struct Guard {
    bulkhead: Option<Arc<Bulkhead>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    retrier: Option<Arc<Retrier>>,
}

impl Guard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bulkhead(mut self, bulkhead: Arc<Bulkhead>) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn with_retrier(mut self, retrier: Arc<Retrier>) -> Self {
        self.retrier = Some(retrier);
        self
    }

    pub fn bulkhead(&self) -> Option<&Arc<Bulkhead>> {
        self.bulkhead.as_ref()
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    pub fn retrier(&self) -> Option<&Arc<Retrier>> {
        self.retrier.as_ref()
    }

    /// Runs `operation` through every configured primitive, retrying on the
    /// error's own [`Retryable`] hint.
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        self.execute_if(cancel, operation, classify::is_retryable::<E>)
            .await
    }

    /// Same as [`Guard::execute`] with a caller-supplied retry predicate.
    pub async fn execute_if<F, Fut, T, E, P>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        should_retry: P,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let _slot = match &self.bulkhead {
            Some(bulkhead) => Some(bulkhead.acquire(cancel).await?),
            None => None,
        };

        let permit = match &self.circuit_breaker {
            Some(breaker) => Some(breaker.allow()?),
            None => None,
        };

        let result = match &self.retrier {
            Some(retrier) => retrier.retry_if(cancel, &mut operation, should_retry).await,
            None => operation().await.map_err(ResilienceError::Operation),
        };

        if let Some(permit) = permit {
            match &result {
                // A cancelled call says nothing about the dependency's health.
                Err(ResilienceError::Cancelled) => drop(permit),
                outcome => permit.record(outcome.is_ok()),
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulkhead::BulkheadConfig;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::retry::RetryPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct Flaky;

    impl Retryable for Flaky {}

    fn breaker(failure_threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "dep",
            CircuitBreakerConfig::default()
                .with_failure_threshold(failure_threshold)
                .with_cooldown(Duration::from_secs(60)),
        ))
    }

    #[tokio::test]
    async fn test_empty_guard_runs_once() {
        let guard = Guard::new();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = guard
            .execute(&CancellationToken::new(), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Flaky)
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Operation(Flaky))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_counts_one_failure_per_retried_call() {
        let breaker = breaker(2);
        let guard = Guard::new()
            .with_circuit_breaker(breaker.clone())
            .with_retrier(Arc::new(Retrier::new(
                "dep",
                RetryPolicy::default()
                    .with_max_attempts(3)
                    .with_initial_delay(Duration::from_millis(1)),
            )));

        let result = guard
            .execute(&CancellationToken::new(), || async { Err::<(), _>(Flaky) })
            .await;
        assert!(result.unwrap_err().is_exhausted());
        assert_eq!(breaker.consecutive_failures(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);

        let _ = guard
            .execute(&CancellationToken::new(), || async { Err::<(), _>(Flaky) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_breaker_releases_bulkhead_slot() {
        let bulkhead = Arc::new(Bulkhead::new("dep", BulkheadConfig::unqueued(1)));
        let breaker = breaker(1);
        let guard = Guard::new()
            .with_bulkhead(bulkhead.clone())
            .with_circuit_breaker(breaker.clone());

        let _ = guard
            .execute(&CancellationToken::new(), || async { Err::<(), _>(Flaky) })
            .await;
        let result = guard
            .execute(&CancellationToken::new(), || async { Ok::<_, Flaky>(1) })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(bulkhead.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_retry_is_not_a_breaker_failure() {
        let breaker = breaker(1);
        let guard = Guard::new()
            .with_circuit_breaker(breaker.clone())
            .with_retrier(Arc::new(Retrier::new(
                "dep",
                RetryPolicy::default().with_initial_delay(Duration::from_secs(60)),
            )));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = guard
            .execute(&cancel, || async { Err::<(), _>(Flaky) })
            .await;

        assert!(matches!(result, Err(ResilienceError::Cancelled)));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }
}
