//! Bounded retry with exponential backoff and optional jitter.
//!
//! A [`Retrier`] re-invokes a fallible async operation while its errors are
//! retryable and the attempt budget lasts. Waits between attempts race the
//! caller's [`CancellationToken`], so cancellation is honored promptly.
//!
//! # Example
//!
//! ```no_run
//! use steadfast_core::retry::{Retrier, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy {
//!     max_attempts: 5,
//!     initial_delay: Duration::from_millis(100),
//!     max_delay: Duration::from_secs(30),
//!     multiplier: 2.0,
//!     ..Default::default()
//! };
//!
//! let retrier = Retrier::new("inventory", policy);
//! let cancel = CancellationToken::new();
//!
//! let value = retrier
//!     .retry(&cancel, || async { Ok::<_, std::io::Error>(42) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use validator::{Validate, ValidationError};

use crate::classify::{self, Retryable};
use crate::config::millis;
use crate::error::{ConfigResult, ResilienceError};
use crate::metrics::{noop_sink, Outcome, SharedSink};

/// Jitter strategy applied on top of the capped backoff delay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Full jitter: random value between 0 and calculated delay
    Full,
    /// Equal jitter: half delay + random half
    Equal,
    /// Decorrelated jitter: initial delay plus a random share of three times the delay
    Decorrelated,
}

/// Immutable retry configuration
///
/// The retryable predicate is not part of the policy: it is passed per call to
/// [`Retrier::retry_if`], and [`Retrier::retry`] uses the error's [`Retryable`] hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_delays"))]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    #[validate(range(min = 1.0))]
    pub multiplier: f64,
    /// Randomization applied to each delay
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: JitterStrategy::None,
        }
    }
}

fn validate_delays(policy: &RetryPolicy) -> Result<(), ValidationError> {
    if policy.initial_delay > policy.max_delay {
        return Err(ValidationError::new("initial_delay_exceeds_max_delay"));
    }
    Ok(())
}

impl RetryPolicy {
    /// A policy that runs the operation once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Clamps every field into its legal range.
    fn sanitized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            self.multiplier = 1.0;
        }
        self.max_delay = self.max_delay.max(self.initial_delay);
        self
    }

    /// Delay after the given failed attempt (1-based), before jitter.
    ///
    /// `min(initial_delay * multiplier^(attempt-1), max_delay)`; the sequence is
    /// non-decreasing and never exceeds `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let max_nanos = self.max_delay.as_nanos() as f64;
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);

        Duration::from_nanos(nanos.min(max_nanos).round() as u64)
    }

    /// Delay after the given failed attempt with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        self.apply_jitter(delay).min(self.max_delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                let jitter = rand::random::<f64>();
                scale(delay, jitter)
            }
            JitterStrategy::Equal => {
                let jitter = rand::random::<f64>();
                let base = scale(delay, 0.5);
                base + scale(base, jitter)
            }
            JitterStrategy::Decorrelated => {
                let jitter = rand::random::<f64>();
                self.initial_delay + scale(delay, 3.0 * jitter)
            }
        }
    }
}

fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::from_nanos((duration.as_nanos() as f64 * factor).round() as u64)
}

/// Per-invocation bookkeeping.
struct RetryAttempt {
    number: u32,
    started: Instant,
}

impl RetryAttempt {
    fn start() -> Self {
        Self {
            number: 0,
            started: Instant::now(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Clone)]
pub struct Retrier {
    name: String,
    policy: RetryPolicy,
    sink: SharedSink,
}

impl Retrier {
    /// Creates a retrier, clamping out-of-range policy fields.
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy: policy.sanitized(),
            sink: noop_sink(),
        }
    }

    /// Creates a retrier, rejecting an invalid policy.
    pub fn try_new(name: impl Into<String>, policy: RetryPolicy) -> ConfigResult<Self> {
        policy.validate()?;
        Ok(Self::new(name, policy))
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retries `operation` using the error's own [`Retryable`] hint.
    pub async fn retry<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        self.retry_if(cancel, operation, classify::is_retryable::<E>)
            .await
    }

    /// Retries `operation` while `should_retry` accepts its errors.
    ///
    /// Attempt 1 always runs. A rejected error is returned untouched as
    /// [`ResilienceError::Operation`]; a retryable error on the last attempt is
    /// wrapped in [`ResilienceError::MaxRetriesExceeded`], even when the policy
    /// allows a single attempt.
    pub async fn retry_if<F, Fut, T, E, P>(
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
        let mut attempt = RetryAttempt::start();

        loop {
            attempt.number += 1;

            let error = match operation().await {
                Ok(value) => {
                    if attempt.number > 1 {
                        debug!(
                            operation = %self.name,
                            attempts = attempt.number,
                            "Operation succeeded after retries"
                        );
                    }
                    self.finish(Outcome::Success, &attempt);
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !should_retry(&error) {
                debug!(
                    operation = %self.name,
                    attempt = attempt.number,
                    "Error is not retryable, giving up"
                );
                self.finish(Outcome::Failure, &attempt);
                return Err(ResilienceError::Operation(error));
            }

            if attempt.number >= self.policy.max_attempts {
                warn!(
                    operation = %self.name,
                    attempts = attempt.number,
                    "Max retry attempts reached"
                );
                self.finish(Outcome::Exhausted, &attempt);
                return Err(ResilienceError::MaxRetriesExceeded {
                    attempts: attempt.number,
                    source: error,
                });
            }

            let delay = self.policy.delay_for(attempt.number);
            debug!(
                operation = %self.name,
                attempt = attempt.number,
                max_attempts = self.policy.max_attempts,
                ?delay,
                "Retrying after delay"
            );
            drop(error);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(operation = %self.name, attempt = attempt.number, "Retry wait cancelled");
                    self.finish(Outcome::Cancelled, &attempt);
                    return Err(ResilienceError::Cancelled);
                }
                _ = sleep(delay) => {}
            }
        }
    }

    fn finish(&self, outcome: Outcome, attempt: &RetryAttempt) {
        self.sink.record_operation(
            &self.name,
            outcome,
            attempt.number,
            attempt.elapsed().as_secs_f64(),
        );
    }
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::RetryHint;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient failure")]
        Transient,
        #[error("fatal failure")]
        Fatal,
    }

    impl Retryable for TestError {
        fn retry_hint(&self) -> RetryHint {
            match self {
                TestError::Transient => RetryHint::Retry,
                TestError::Fatal => RetryHint::DoNotRetry,
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: JitterStrategy::None,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_immediately() {
        let retrier = Retrier::new("test", RetryPolicy::default());
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retrier
            .retry(&CancellationToken::new(), || {
                let c = counter_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let retrier = Retrier::new("test", fast_policy(3));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let started = Instant::now();

        let result = retrier
            .retry(&CancellationToken::new(), || {
                let c = counter_clone.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        // 10ms + 20ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(5)]
    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_budget(#[case] max_attempts: u32) {
        let retrier = Retrier::new("test", fast_policy(max_attempts));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retrier
            .retry(&CancellationToken::new(), || {
                let c = counter_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Transient)
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), max_attempts);
        match result {
            Err(ResilienceError::MaxRetriesExceeded { attempts, source }) => {
                assert_eq!(attempts, max_attempts);
                assert!(matches!(source, TestError::Transient));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_short_circuits() {
        let retrier = Retrier::new("test", fast_policy(5));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retrier
            .retry(&CancellationToken::new(), || {
                let c = counter_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Fatal)
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(ResilienceError::Operation(TestError::Fatal))
        ));
    }

    #[tokio::test]
    async fn test_non_retryable_on_last_attempt_is_not_wrapped() {
        let retrier = Retrier::new("test", RetryPolicy::no_retry());

        let result = retrier
            .retry(&CancellationToken::new(), || async {
                Err::<(), _>(TestError::Fatal)
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Operation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate_overrides_hint() {
        let retrier = Retrier::new("test", fast_policy(4));
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retrier
            .retry_if(
                &CancellationToken::new(),
                || {
                    let c = counter_clone.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("not retryable by predicate")
                    }
                },
                |_| false,
            )
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ResilienceError::Operation(_))));
    }

    #[tokio::test]
    async fn test_cancellation_during_wait_returns_cancelled() {
        let retrier = Retrier::new(
            "test",
            fast_policy(3)
                .with_initial_delay(Duration::from_secs(60))
                .with_max_delay(Duration::from_secs(60)),
        );
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result = retrier
            .retry(&cancel, || {
                let c = counter_clone.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Transient)
                }
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Cancelled)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_first_attempt_runs_even_if_already_cancelled() {
        let retrier = Retrier::new("test", fast_policy(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = retrier
            .retry(&cancel, || async { Ok::<_, TestError>("ran") })
            .await;

        assert_eq!(result.unwrap(), "ran");
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: JitterStrategy::None,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let policy = fast_policy(10);

        assert_eq!(policy.delay_for(4), Duration::from_millis(80));
        assert_eq!(policy.delay_for(5), Duration::from_millis(100));
        assert_eq!(policy.delay_for(60), Duration::from_millis(100));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_sequence_is_non_decreasing() {
        let policy = fast_policy(10).with_multiplier(1.7);
        let delays: Vec<_> = (1..20).map(|n| policy.base_delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = fast_policy(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(JitterStrategy::Full);

        let delays: Vec<_> = (0..20).map(|_| policy.delay_for(2)).collect();

        let all_same = delays.windows(2).all(|w| w[0] == w[1]);
        assert!(!all_same, "Jitter should produce different delays");
        for delay in delays {
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_equal_jitter_keeps_half_of_delay() {
        let policy = fast_policy(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(JitterStrategy::Equal);

        for _ in 0..20 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_try_new_rejects_invalid_policy() {
        assert!(Retrier::try_new("test", RetryPolicy::default().with_max_attempts(0)).is_err());
        assert!(Retrier::try_new("test", RetryPolicy::default().with_multiplier(0.5)).is_err());
        assert!(Retrier::try_new(
            "test",
            RetryPolicy::default()
                .with_initial_delay(Duration::from_secs(5))
                .with_max_delay(Duration::from_secs(1))
        )
        .is_err());
        assert!(Retrier::try_new("test", RetryPolicy::default()).is_ok());
    }

    #[test]
    fn test_new_clamps_policy() {
        let retrier = Retrier::new(
            "test",
            RetryPolicy::default()
                .with_max_attempts(0)
                .with_multiplier(f64::NAN),
        );
        assert_eq!(retrier.policy().max_attempts, 1);
        assert_eq!(retrier.policy().multiplier, 1.0);
    }
}
