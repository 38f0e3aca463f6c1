//! Aggregate configuration for the resilience primitives.
//!
//! Every primitive owns its configuration struct next to its implementation;
//! this module bundles them so a host application can deserialize a single
//! `[resilience]` table and validate it in one pass.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::bulkhead::BulkheadConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigResult;
use crate::retry::RetryPolicy;
use crate::shutdown::ShutdownConfig;

/// Defaults applied to every dependency the registry hands out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ResilienceConfig {
    #[validate(nested)]
    pub retry: RetryPolicy,
    #[validate(nested)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[validate(nested)]
    pub bulkhead: BulkheadConfig,
    #[validate(nested)]
    pub shutdown: ShutdownConfig,
}

impl ResilienceConfig {
    /// Validates every nested section.
    pub fn validated(self) -> ConfigResult<Self> {
        self.validate()?;
        Ok(self)
    }
}

/// Serde adapters storing [`std::time::Duration`] as whole milliseconds.
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    /// Same as the parent module, for optional durations.
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer
                    .serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}
