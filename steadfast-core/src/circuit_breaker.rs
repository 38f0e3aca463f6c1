//! Circuit Breaker implementation for preventing cascading failures.
//!
//! A circuit breaker monitors for failures and temporarily blocks requests when failures
//! exceed a threshold, allowing the dependency time to recover.
//!
//! # States
//!
//! - **Closed**: Normal operation, requests pass through
//! - **Open**: Too many failures detected, requests are rejected
//! - **HalfOpen**: A limited number of trial requests test if the dependency recovered
//!
//! State lives behind a single mutex, so every transition is linearizable. Each
//! admitted call holds a [`CallPermit`] stamped with the state generation it was
//! admitted under; results reported against an older generation are ignored by
//! the state machine.
//!
//! # Example
//!
//! ```no_run
//! use steadfast_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CircuitBreakerConfig {
//!     failure_threshold: 5,
//!     success_threshold: 2,
//!     cooldown: Duration::from_secs(60),
//!     half_open_max_trials: 1,
//! };
//!
//! let breaker = CircuitBreaker::new("payments", config);
//!
//! match breaker.call(|| async { Ok::<_, std::io::Error>(42) }).await {
//!     Ok(result) => println!("Success: {}", result),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::config::millis;
use crate::error::{ConfigResult, Rejection, ResilienceError};
use crate::metrics::{noop_sink, RejectionKind, SharedSink};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Too many failures, requests are rejected
    Open,
    /// Testing if the dependency has recovered
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "Closed"),
            CircuitState::Open => write!(f, "Open"),
            CircuitState::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    #[validate(range(min = 1))]
    pub failure_threshold: u32,
    /// Number of trial successes in half-open state to close circuit
    #[validate(range(min = 1))]
    pub success_threshold: u32,
    /// Time to wait before transitioning from open to half-open
    #[serde(rename = "cooldown_ms", with = "millis")]
    pub cooldown: Duration,
    /// Maximum number of concurrent trial requests in half-open state
    #[validate(range(min = 1))]
    pub half_open_max_trials: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(60),
            half_open_max_trials: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_half_open_max_trials(mut self, trials: u32) -> Self {
        self.half_open_max_trials = trials;
        self
    }

    fn sanitized(mut self) -> Self {
        self.failure_threshold = self.failure_threshold.max(1);
        self.success_threshold = self.success_threshold.max(1);
        self.half_open_max_trials = self.half_open_max_trials.max(1);
        self
    }
}

/// Lifetime counters for circuit breaker
#[derive(Debug, Default)]
struct CircuitBreakerCounters {
    failures: AtomicU64,
    successes: AtomicU64,
    opened_count: AtomicU64,
    closed_count: AtomicU64,
    rejected_count: AtomicU64,
}

impl CircuitBreakerCounters {
    fn record(&self, success: bool) {
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    pub failures: u64,
    pub successes: u64,
    pub opened_count: u64,
    pub closed_count: u64,
    pub rejected_count: u64,
}

/// Internal state of the circuit breaker
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
    generation: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            trials_in_flight: 0,
            generation: 0,
        }
    }
}

/// Circuit breaker guarding one named dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    counters: CircuitBreakerCounters,
    sink: SharedSink,
}

impl CircuitBreaker {
    /// Create a new circuit breaker, clamping thresholds to at least 1
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(breaker = %name, "Creating circuit breaker");

        Self {
            name,
            config: config.sanitized(),
            state: Mutex::new(BreakerState::new()),
            counters: CircuitBreakerCounters::default(),
            sink: noop_sink(),
        }
    }

    /// Create a new circuit breaker, rejecting an invalid configuration
    pub fn try_new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::new(name, config))
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker
    ///
    /// An open breaker whose cooldown has elapsed still reports `Open` until the
    /// next call is admitted as a trial.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Get statistics
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            failures: self.counters.failures.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            opened_count: self.counters.opened_count.load(Ordering::Relaxed),
            closed_count: self.counters.closed_count.load(Ordering::Relaxed),
            rejected_count: self.counters.rejected_count.load(Ordering::Relaxed),
        }
    }

    /// Asks for permission to run one call.
    ///
    /// The returned permit must be settled with [`CallPermit::record`]; a permit
    /// dropped unsettled frees its trial slot without counting as an outcome.
    pub fn allow(&self) -> Result<CallPermit<'_>, Rejection> {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Ok(self.permit(&state, false)),
            CircuitState::Open => {
                let cooled_down = state
                    .opened_at
                    .map_or(true, |opened_at| opened_at.elapsed() >= self.config.cooldown);

                if cooled_down {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    state.trials_in_flight = 1;
                    Ok(self.permit(&state, true))
                } else {
                    Err(self.reject())
                }
            }
            CircuitState::HalfOpen => {
                if state.trials_in_flight >= self.config.half_open_max_trials {
                    Err(self.reject())
                } else {
                    state.trials_in_flight += 1;
                    Ok(self.permit(&state, true))
                }
            }
        }
    }

    /// Call a function with circuit breaker protection
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.allow()?;

        match f().await {
            Ok(result) => {
                permit.record(true);
                Ok(result)
            }
            Err(e) => {
                permit.record(false);
                Err(ResilienceError::Operation(e))
            }
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut state = self.lock();
        info!(breaker = %self.name, "Manually resetting circuit breaker");
        if state.state == CircuitState::Closed {
            state.consecutive_failures = 0;
            state.consecutive_successes = 0;
        } else {
            self.transition(&mut state, CircuitState::Closed);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn permit(&self, state: &BreakerState, trial: bool) -> CallPermit<'_> {
        CallPermit {
            breaker: self,
            generation: state.generation,
            trial,
            settled: false,
        }
    }

    fn reject(&self) -> Rejection {
        self.counters.rejected_count.fetch_add(1, Ordering::Relaxed);
        self.sink.record_rejection(&self.name, RejectionKind::CircuitOpen);
        debug!(breaker = %self.name, "Circuit breaker rejected call");
        Rejection::CircuitOpen {
            name: self.name.clone(),
        }
    }

    fn on_result(&self, generation: u64, trial: bool, success: bool) {
        self.counters.record(success);

        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        if trial {
            state.trials_in_flight = state.trials_in_flight.saturating_sub(1);
        }

        match (state.state, success) {
            (CircuitState::Closed, true) => {
                state.consecutive_failures = 0;
            }
            (CircuitState::Closed, false) => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut state, CircuitState::Open);
                }
            }
            (CircuitState::HalfOpen, true) => {
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut state, CircuitState::Closed);
                }
            }
            (CircuitState::HalfOpen, false) => {
                self.transition(&mut state, CircuitState::Open);
            }
            // Permits are never issued under an Open generation.
            (CircuitState::Open, _) => {}
        }
    }

    fn on_abandon(&self, generation: u64, trial: bool) {
        if !trial {
            return;
        }
        let mut state = self.lock();
        if state.generation == generation {
            state.trials_in_flight = state.trials_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        state.state = to;
        state.generation += 1;
        state.trials_in_flight = 0;
        state.consecutive_successes = 0;

        match to {
            CircuitState::Open => {
                state.opened_at = Some(Instant::now());
                self.counters.opened_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    breaker = %self.name,
                    from = %from,
                    consecutive_failures = state.consecutive_failures,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "Circuit breaker transitioning to half-open");
            }
            CircuitState::Closed => {
                state.consecutive_failures = 0;
                state.opened_at = None;
                self.counters.closed_count.fetch_add(1, Ordering::Relaxed);
                info!(breaker = %self.name, from = %from, "Circuit breaker closed");
            }
        }

        self.sink.record_transition(&self.name, from, to);
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Permission to run one call through a [`CircuitBreaker`].
#[must_use = "a permit must be settled with `record`"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    /// True when this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Reports the call's outcome to the breaker.
    pub fn record(mut self, success: bool) {
        self.settled = true;
        self.breaker.on_result(self.generation, self.trial, success);
    }

    pub fn record_success(self) {
        self.record(true);
    }

    pub fn record_failure(self) {
        self.record(false);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandon(self.generation, self.trial);
        }
    }
}

impl fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name)
            .field("generation", &self.generation)
            .field("trial", &self.trial)
            .finish()
    }
}
