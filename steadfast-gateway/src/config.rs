use std::collections::BTreeMap;

use anyhow::Result;
use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;
use steadfast_api::observability::LogConfig;
use steadfast_core::{BulkheadConfig, CircuitBreakerConfig, ResilienceConfig, RetryPolicy};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub port: u16,
    pub log: LogConfig,
    /// Defaults for every dependency
    pub resilience: ResilienceConfig,
    /// Dependencies created at startup, with optional per-dependency overrides
    pub dependencies: BTreeMap<String, DependencyConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    pub retry: Option<RetryPolicy>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub bulkhead: Option<BulkheadConfig>,
}

impl GatewayConfig {
    /// Loads `config/default`, `config/local`, then `STEADFAST__*` variables
    pub fn load() -> Result<Self> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("STEADFAST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_loader(config)
    }

    fn from_loader(config: ConfigLoader) -> Result<Self> {
        let mut gateway: Self = config.try_deserialize()?;
        gateway.resilience = gateway.resilience.validated()?;
        Ok(gateway)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            log: LogConfig::default(),
            resilience: ResilienceConfig::default(),
            dependencies: BTreeMap::new(),
        }
    }
}
