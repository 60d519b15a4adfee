//! Counters describing limiter and sweeper activity.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared, cheaply cloneable limiter metrics.
#[derive(Debug, Clone, Default)]
pub struct LimiterMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    checks_allowed: AtomicU64,
    checks_rejected: AtomicU64,
    store_errors: AtomicU64,
    windows_swept: AtomicU64,
}

impl LimiterMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allowed(&self) {
        self.inner.checks_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.inner.checks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_error(&self) {
        self.inner.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_swept(&self, windows: usize) {
        self.inner
            .windows_swept
            .fetch_add(windows as u64, Ordering::Relaxed);
    }

    /// Checks that admitted a request.
    pub fn checks_allowed(&self) -> u64 {
        self.inner.checks_allowed.load(Ordering::Relaxed)
    }

    /// Checks that rejected a request.
    pub fn checks_rejected(&self) -> u64 {
        self.inner.checks_rejected.load(Ordering::Relaxed)
    }

    /// Checks that failed because the store was unavailable.
    pub fn store_errors(&self) -> u64 {
        self.inner.store_errors.load(Ordering::Relaxed)
    }

    /// Windows reclaimed by the sweeper.
    pub fn windows_swept(&self) -> u64 {
        self.inner.windows_swept.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            checks_allowed: self.checks_allowed(),
            checks_rejected: self.checks_rejected(),
            store_errors: self.store_errors(),
            windows_swept: self.windows_swept(),
        }
    }
}

/// Point-in-time copy of [`LimiterMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Checks that admitted a request
    pub checks_allowed: u64,
    /// Checks that rejected a request
    pub checks_rejected: u64,
    /// Checks that failed because the store was unavailable
    pub store_errors: u64,
    /// Expired windows removed by the sweeper
    pub windows_swept: u64,
}

impl MetricsSnapshot {
    /// Fraction of completed checks that were rejected, 0.0 when none ran.
    pub fn rejection_rate(&self) -> f64 {
        let total = self.checks_allowed.saturating_add(self.checks_rejected);
        if total == 0 {
            0.0
        } else {
            self.checks_rejected as f64 / total as f64
        }
    }
}
