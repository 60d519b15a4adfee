//! Reclamation of expired windows.
//!
//! Expired windows are already replaced lazily when their identifier is
//! checked again. The sweeper handles identifiers that never come back, either
//! on demand or from a periodic background task.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::metrics::LimiterMetrics;
use super::store::WindowStore;
use super::window::Timestamp;
use crate::error::{Result, TurnstileError};

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Windows removed by this pass
    pub removed: usize,
    /// Windows left in the store afterwards
    pub remaining: usize,
    /// Wall time the pass took
    pub elapsed: Duration,
}

/// Removes windows whose `reset_at` has passed.
///
/// Removal goes through the store's per-identifier exclusivity and re-checks
/// expiry there, so a window reopened by a concurrent check is never removed.
pub struct Sweeper<S: WindowStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    metrics: LimiterMetrics,
}

impl<S: WindowStore> Sweeper<S> {
    /// Create a sweeper over `store` using the system clock.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock::new()))
    }

    /// Create a sweeper over `store` reading time from `clock`.
    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            metrics: LimiterMetrics::new(),
        }
    }

    /// Record swept windows in a shared metrics handle.
    pub fn with_metrics(mut self, metrics: LimiterMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sweep at the clock's current time.
    pub fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(self.clock.now())
    }

    /// Sweep every window that has ended at `now`.
    pub fn sweep_at(&self, now: Timestamp) -> Result<SweepReport> {
        let started = Instant::now();
        let removed = self.store.sweep_expired(now)?;
        self.metrics.record_swept(removed);

        let report = SweepReport {
            removed,
            remaining: self.store.len(),
            elapsed: started.elapsed(),
        };

        debug!(
            removed = report.removed,
            remaining = report.remaining,
            elapsed_us = report.elapsed.as_micros() as u64,
            "Swept expired windows"
        );

        Ok(report)
    }

    /// The metrics this sweeper records into.
    pub fn metrics(&self) -> &LimiterMetrics {
        &self.metrics
    }
}

impl<S: WindowStore + 'static> Sweeper<S> {
    /// Run [`sweep`](Self::sweep) every `interval` on the tokio runtime.
    ///
    /// The first pass happens one interval after spawning. Dropping the
    /// returned handle also stops the task at its next wake-up.
    pub fn spawn(self, interval: Duration) -> Result<SweeperHandle> {
        if interval.is_zero() {
            return Err(TurnstileError::Configuration(
                "sweep interval must be greater than 0".to_string(),
            ));
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting window sweeper"
        );

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep() {
                            warn!(error = %e, "Window sweep failed");
                        }
                    }
                    _ = &mut shutdown_rx => {
                        debug!("Window sweeper stopping");
                        break;
                    }
                }
            }
        });

        Ok(SweeperHandle {
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

/// Handle to a running background sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "Window sweeper task ended abnormally");
        }
        info!("Window sweeper stopped");
    }

    /// Whether the background task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
