//! Named registry of per-dependency primitives.
//!
//! Every outbound dependency gets its own breaker, bulkhead and retrier, created
//! lazily from the registry defaults the first time the name is seen. Explicit
//! registration replaces the defaults for one dependency.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::bulkhead::{Bulkhead, BulkheadConfig, BulkheadStats};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
use crate::config::ResilienceConfig;
use crate::error::ConfigResult;
use crate::guard::Guard;
use crate::metrics::{noop_sink, SharedSink};
use crate::retry::{Retrier, RetryPolicy};

/// Status of one dependency, as reported by [`DependencyRegistry::snapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_state: Option<CircuitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulkhead: Option<BulkheadStats>,
}

/// Registry for managing per-dependency primitives
pub struct DependencyRegistry {
    defaults: ResilienceConfig,
    sink: SharedSink,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    bulkheads: DashMap<String, Arc<Bulkhead>>,
    retriers: DashMap<String, Arc<Retrier>>,
}

impl DependencyRegistry {
    pub fn new(defaults: ResilienceConfig) -> Self {
        Self {
            defaults,
            sink: noop_sink(),
            breakers: DashMap::new(),
            bulkheads: DashMap::new(),
            retriers: DashMap::new(),
        }
    }

    /// Creates a registry after validating the defaults
    pub fn try_new(defaults: ResilienceConfig) -> ConfigResult<Self> {
        Ok(Self::new(defaults.validated()?))
    }

    /// Sets the sink handed to every primitive created afterwards
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn defaults(&self) -> &ResilienceConfig {
        &self.defaults
    }

    /// Gets or creates the breaker for `name` with the default config
    pub fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(name) {
            return Arc::clone(breaker.value());
        }
        let breaker = self
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(dependency = %name, "Creating default circuit breaker");
                Arc::new(
                    CircuitBreaker::new(name, self.defaults.circuit_breaker.clone())
                        .with_sink(self.sink.clone()),
                )
            });
        Arc::clone(breaker.value())
    }

    /// Gets or creates the bulkhead for `name` with the default config
    pub fn bulkhead(&self, name: &str) -> Arc<Bulkhead> {
        if let Some(bulkhead) = self.bulkheads.get(name) {
            return Arc::clone(bulkhead.value());
        }
        let bulkhead = self
            .bulkheads
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(dependency = %name, "Creating default bulkhead");
                Arc::new(
                    Bulkhead::new(name, self.defaults.bulkhead.clone()).with_sink(self.sink.clone()),
                )
            });
        Arc::clone(bulkhead.value())
    }

    /// Gets or creates the retrier for `name` with the default policy
    pub fn retrier(&self, name: &str) -> Arc<Retrier> {
        if let Some(retrier) = self.retriers.get(name) {
            return Arc::clone(retrier.value());
        }
        let retrier = self.retriers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Retrier::new(name, self.defaults.retry.clone()).with_sink(self.sink.clone()))
        });
        Arc::clone(retrier.value())
    }

    /// Registers a breaker for `name`, replacing any existing one
    pub fn register_circuit_breaker(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<Arc<CircuitBreaker>> {
        let breaker = Arc::new(CircuitBreaker::try_new(name, config)?.with_sink(self.sink.clone()));
        self.breakers.insert(name.to_string(), Arc::clone(&breaker));
        Ok(breaker)
    }

    /// Registers a bulkhead for `name`, replacing any existing one
    pub fn register_bulkhead(&self, name: &str, config: BulkheadConfig) -> ConfigResult<Arc<Bulkhead>> {
        let bulkhead = Arc::new(Bulkhead::try_new(name, config)?.with_sink(self.sink.clone()));
        self.bulkheads.insert(name.to_string(), Arc::clone(&bulkhead));
        Ok(bulkhead)
    }

    /// Registers a retrier for `name`, replacing any existing one
    pub fn register_retrier(&self, name: &str, policy: RetryPolicy) -> ConfigResult<Arc<Retrier>> {
        let retrier = Arc::new(Retrier::try_new(name, policy)?.with_sink(self.sink.clone()));
        self.retriers.insert(name.to_string(), Arc::clone(&retrier));
        Ok(retrier)
    }

    /// Builds a guard composing the bulkhead, breaker and retrier for `name`
    pub fn guard(&self, name: &str) -> Guard {
        Guard::new()
            .with_bulkhead(self.bulkhead(name))
            .with_circuit_breaker(self.circuit_breaker(name))
            .with_retrier(self.retrier(name))
    }

    /// Lists every known dependency name, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        names.extend(self.breakers.iter().map(|entry| entry.key().clone()));
        names.extend(self.bulkheads.iter().map(|entry| entry.key().clone()));
        names.extend(self.retriers.iter().map(|entry| entry.key().clone()));
        names.into_iter().collect()
    }

    /// Status of every known dependency, sorted by name
    pub fn snapshot(&self) -> Vec<DependencyStatus> {
        self.names()
            .into_iter()
            .map(|name| {
                let breaker = self.breakers.get(&name).map(|entry| Arc::clone(entry.value()));
                let bulkhead = self.bulkheads.get(&name).map(|entry| entry.value().stats());

                DependencyStatus {
                    circuit_state: breaker.as_ref().map(|b| b.state()),
                    circuit_breaker: breaker.as_ref().map(|b| b.stats()),
                    bulkhead,
                    name,
                }
            })
            .collect()
    }
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}

impl std::fmt::Debug for DependencyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyRegistry")
            .field("defaults", &self.defaults)
            .field("dependencies", &self.names())
            .finish()
    }
}
