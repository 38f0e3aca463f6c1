//! Bulkhead pattern implementation for resource isolation.
//!
//! A bulkhead caps the number of concurrent in-flight operations against a
//! resource. Callers beyond the cap either wait in a bounded FIFO queue or are
//! rejected immediately.
//!
//! # Example
//!
//! ```no_run
//! use steadfast_core::bulkhead::{Bulkhead, BulkheadConfig};
//! use tokio_util::sync::CancellationToken;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BulkheadConfig {
//!     max_concurrent: 10,
//!     max_queued: 100,
//!     queue_timeout: Some(Duration::from_secs(30)),
//! };
//!
//! let bulkhead = Bulkhead::new("database", config);
//! let cancel = CancellationToken::new();
//!
//! let permit = bulkhead.acquire(&cancel).await?;
//! // ... call the database ...
//! permit.release();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use validator::Validate;

use crate::config::millis;
use crate::error::{ConfigResult, Rejection, ResilienceError};
use crate::metrics::{noop_sink, RejectionKind, SharedSink};

/// Configuration for a bulkhead
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent operations allowed
    #[validate(range(min = 1))]
    pub max_concurrent: usize,
    /// Maximum number of callers waiting for a slot; 0 disables queueing
    pub max_queued: usize,
    /// How long a queued caller waits before giving up; `None` waits until cancelled
    #[serde(rename = "queue_timeout_ms", with = "millis::option")]
    pub queue_timeout: Option<Duration>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 25,
            max_queued: 100,
            queue_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl BulkheadConfig {
    /// A bulkhead that never queues.
    pub fn unqueued(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            max_queued: 0,
            queue_timeout: None,
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_max_queued(mut self, max: usize) -> Self {
        self.max_queued = max;
        self
    }

    pub fn with_queue_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.queue_timeout = timeout;
        self
    }

    fn sanitized(mut self) -> Self {
        self.max_concurrent = self.max_concurrent.clamp(1, Semaphore::MAX_PERMITS);
        self
    }
}

/// Point-in-time bulkhead statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkheadStats {
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub queued: usize,
    pub admitted: u64,
    pub rejected: u64,
    pub timeouts: u64,
}

/// Concurrency limiter guarding one named resource.
pub struct Bulkhead {
    name: String,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    admitted: AtomicU64,
    rejected: AtomicU64,
    timeouts: AtomicU64,
    sink: SharedSink,
}

impl Bulkhead {
    /// Creates a new bulkhead, clamping `max_concurrent` to at least 1
    pub fn new(name: impl Into<String>, config: BulkheadConfig) -> Self {
        let config = config.sanitized();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));

        Self {
            name: name.into(),
            config,
            semaphore,
            queued: AtomicUsize::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            sink: noop_sink(),
        }
    }

    /// Creates a new bulkhead, rejecting an invalid configuration
    pub fn try_new(name: impl Into<String>, config: BulkheadConfig) -> ConfigResult<Self> {
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

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Returns the number of free slots
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Returns the number of operations currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.config
            .max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Returns the number of callers waiting for a slot
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            max_concurrent: self.config.max_concurrent,
            in_flight: self.in_flight(),
            queued: self.queued(),
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Acquires a slot, queueing if the bulkhead is full and the queue has room.
    ///
    /// Queued callers are admitted in arrival order. A caller that times out or
    /// is cancelled while queued gets [`Rejection::BulkheadFull`] and leaves
    /// without taking a slot.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<BulkheadPermit, Rejection> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(self.admit(permit));
        }

        let Some(_slot) = self.reserve_queue_slot() else {
            return Err(self.reject(RejectionKind::BulkheadFull));
        };

        debug!(bulkhead = %self.name, queued = self.queued(), "Waiting for bulkhead slot");

        let queue_timeout = self.config.queue_timeout;
        let expired = async move {
            match queue_timeout {
                Some(timeout) => sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(self.reject(RejectionKind::Cancelled)),
            acquired = self.semaphore.clone().acquire_owned() => match acquired {
                Ok(permit) => Ok(self.admit(permit)),
                Err(_) => Err(self.reject(RejectionKind::BulkheadFull)),
            },
            _ = expired => {
                warn!(bulkhead = %self.name, timeout = ?queue_timeout, "Bulkhead queue wait timed out");
                Err(self.reject(RejectionKind::QueueTimeout))
            }
        }
    }

    /// Acquires a slot only if one is free right now
    pub fn try_acquire(&self) -> Result<BulkheadPermit, Rejection> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(self.admit(permit)),
            Err(_) => Err(self.reject(RejectionKind::BulkheadFull)),
        }
    }

    /// Executes an async operation within the bulkhead
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _permit = self.acquire(cancel).await?;
        f().await.map_err(ResilienceError::Operation)
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> BulkheadPermit {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        BulkheadPermit { permit }
    }

    fn reserve_queue_slot(&self) -> Option<QueueSlot<'_>> {
        let max_queued = self.config.max_queued;
        if max_queued == 0 {
            return None;
        }

        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < max_queued).then_some(queued + 1)
            })
            .ok()
            .map(|_| QueueSlot {
                queued: &self.queued,
            })
    }

    /// Every refusal surfaces as `BulkheadFull`; the sink keeps the reason.
    fn reject(&self, kind: RejectionKind) -> Rejection {
        self.sink.record_rejection(&self.name, kind);
        self.rejected.fetch_add(1, Ordering::Relaxed);
        if kind == RejectionKind::QueueTimeout {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
        debug!(bulkhead = %self.name, reason = %kind, "Bulkhead rejected call");

        Rejection::BulkheadFull {
            name: self.name.clone(),
        }
    }
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bulkhead")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("available_permits", &self.available_permits())
            .finish()
    }
}

/// Reservation in the wait queue, returned on drop.
struct QueueSlot<'a> {
    queued: &'a AtomicUsize,
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A held bulkhead slot. The slot is released exactly once, by
/// [`BulkheadPermit::release`] or on drop.
#[must_use = "dropping the permit releases the slot immediately"]
#[derive(Debug)]
pub struct BulkheadPermit {
    permit: OwnedSemaphorePermit,
}

impl BulkheadPermit {
    pub fn release(self) {
        drop(self.permit);
    }
}
