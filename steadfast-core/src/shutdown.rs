//! Graceful shutdown coordination for inbound requests.
//!
//! One [`ShutdownCoordinator`] is created at process start and shared by `Arc`
//! with every component that admits inbound work. It counts in-flight requests,
//! flips to draining exactly once, and lets the host wait (without polling)
//! until the count reaches zero or the drain deadline passes.
//!
//! # Example
//!
//! ```no_run
//! use steadfast_core::shutdown::{ShutdownConfig, ShutdownCoordinator};
//! use tokio_util::sync::CancellationToken;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let coordinator = Arc::new(ShutdownCoordinator::new(
//!     ShutdownConfig::default().with_drain_period(Duration::from_secs(10)),
//! ));
//!
//! if let Some(guard) = coordinator.try_track() {
//!     // ... serve the request ...
//!     drop(guard);
//! }
//!
//! coordinator.initiate_shutdown();
//! if let Err(e) = coordinator.wait_for_drain(&CancellationToken::new()).await {
//!     eprintln!("{e}");
//! }
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::config::millis;
use crate::error::{ConfigResult, DrainError};

/// Lifecycle phase of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPhase {
    Running,
    Draining,
    Stopped,
}

impl ShutdownPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownPhase::Running => "running",
            ShutdownPhase::Draining => "draining",
            ShutdownPhase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shutdown configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Grace period granted to in-flight requests once draining starts
    #[serde(rename = "drain_period_ms", with = "millis")]
    pub drain_period: Duration,
    /// Value of the `Retry-After` hint sent to rejected clients
    #[validate(range(min = 1))]
    pub retry_after_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_period: Duration::from_secs(30),
            retry_after_secs: 5,
        }
    }
}

impl ShutdownConfig {
    pub fn with_drain_period(mut self, drain_period: Duration) -> Self {
        self.drain_period = drain_period;
        self
    }

    pub fn with_retry_after_secs(mut self, secs: u64) -> Self {
        self.retry_after_secs = secs;
        self
    }
}

struct Lifecycle {
    phase: ShutdownPhase,
    deadline: Option<Instant>,
}

/// Coordinator for graceful shutdown
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    active: AtomicI64,
    draining: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    drained: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator in the `Running` phase
    pub fn new(config: ShutdownConfig) -> Self {
        let config = ShutdownConfig {
            retry_after_secs: config.retry_after_secs.max(1),
            ..config
        };

        Self {
            config,
            active: AtomicI64::new(0),
            draining: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle {
                phase: ShutdownPhase::Running,
                deadline: None,
            }),
            drained: Notify::new(),
        }
    }

    pub fn try_new(config: ShutdownConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    /// Tracks one request unconditionally.
    pub fn track(self: &Arc<Self>) -> RequestGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            coordinator: Arc::clone(self),
        }
    }

    /// Tracks one request unless draining has started.
    ///
    /// A request admitted here is always counted by a concurrent
    /// [`ShutdownCoordinator::wait_for_drain`].
    pub fn try_track(self: &Arc<Self>) -> Option<RequestGuard> {
        self.active.fetch_add(1, Ordering::SeqCst);
        if self.draining.load(Ordering::SeqCst) {
            self.release();
            return None;
        }
        Some(RequestGuard {
            coordinator: Arc::clone(self),
        })
    }

    /// Moves to `Draining` and starts the drain deadline.
    ///
    /// Returns `false` if shutdown was already initiated.
    pub fn initiate_shutdown(&self) -> bool {
        let mut lifecycle = self.lock();
        if lifecycle.phase != ShutdownPhase::Running {
            debug!("Shutdown already in progress");
            return false;
        }

        lifecycle.phase = ShutdownPhase::Draining;
        lifecycle.deadline = Some(Instant::now() + self.config.drain_period);
        self.draining.store(true, Ordering::SeqCst);

        info!(
            active_requests = self.active_count(),
            drain_period = ?self.config.drain_period,
            "Starting graceful shutdown"
        );
        true
    }

    /// Get the number of in-flight tracked requests
    pub fn active_count(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.lock().phase
    }

    /// Check if shutdown is in progress
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Instant after which the drain gives up, once shutdown was initiated
    pub fn deadline(&self) -> Option<Instant> {
        self.lock().deadline
    }

    /// Hint sent to clients rejected while draining
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.config.retry_after_secs)
    }

    /// Waits until every tracked request has finished.
    ///
    /// Initiates shutdown first if it has not been initiated. Returns
    /// [`DrainError::Timeout`] once the drain deadline passes with requests
    /// still active, and [`DrainError::Cancelled`] if `cancel` fires first.
    /// The phase becomes `Stopped` whenever this returns.
    pub async fn wait_for_drain(&self, cancel: &CancellationToken) -> Result<(), DrainError> {
        self.initiate_shutdown();

        let started = Instant::now();
        let deadline = self.deadline().unwrap_or(started);

        info!(active_requests = self.active_count(), "Draining active requests");

        let result = loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before reading the count so a release in between is not missed.
            notified.as_mut().enable();

            if self.active_count() <= 0 {
                break Ok(());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let active = self.active_count();
                    debug!(active_requests = active, "Drain wait cancelled");
                    break Err(DrainError::Cancelled { active });
                }
                _ = &mut notified => continue,
                _ = sleep_until(deadline) => {
                    let active = self.active_count();
                    if active <= 0 {
                        break Ok(());
                    }
                    warn!(active_requests = active, "Drain timed out with requests still active");
                    break Err(DrainError::Timeout {
                        waited: started.elapsed(),
                        active,
                    });
                }
            }
        };

        if result.is_ok() {
            info!("All requests drained");
        }
        self.lock().phase = ShutdownPhase::Stopped;
        result
    }

    fn release(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(ShutdownConfig::default())
    }
}

impl fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("phase", &self.phase())
            .field("active", &self.active_count())
            .field("config", &self.config)
            .finish()
    }
}

/// Request guard that keeps one request counted until dropped
#[must_use = "the request stops being tracked when the guard is dropped"]
pub struct RequestGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.coordinator.release();
    }
}

impl fmt::Debug for RequestGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGuard")
            .field("active", &self.coordinator.active_count())
            .finish()
    }
}
