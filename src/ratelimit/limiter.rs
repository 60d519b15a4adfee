//! Core rate limiter implementation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::metrics::LimiterMetrics;
use super::policy::Policy;
use super::store::WindowStore;
use super::window::{Timestamp, Window};
use crate::error::{Result, TurnstileError};

/// The outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The policy's request limit
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window ends
    pub reset_at: Timestamp,
    /// Seconds to wait before retrying; only set on rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    fn admitted(policy: &Policy, window: &Window) -> Self {
        Self {
            allowed: true,
            limit: policy.max_requests,
            remaining: policy.max_requests.saturating_sub(window.count),
            reset_at: window.reset_at,
            retry_after_secs: None,
        }
    }

    fn rejected(policy: &Policy, window: &Window, now: Timestamp) -> Self {
        Self {
            allowed: false,
            limit: policy.max_requests,
            remaining: 0,
            reset_at: window.reset_at,
            retry_after_secs: Some(window.retry_after_secs(now)),
        }
    }

    /// The retry hint as a duration.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs.map(Duration::from_secs)
    }
}

/// What to decide when the window store cannot be reached.
///
/// The limiter never picks one on its own; callers opt in through
/// [`Limiter::check_with_fallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request
    Open,
    /// Reject the request
    Closed,
}

impl FailurePolicy {
    fn decide(self, policy: &Policy, now: Timestamp) -> Decision {
        // Nothing is known about the real window, so report a full one.
        let window = Window {
            count: 0,
            reset_at: now.saturating_add_millis(policy.window_ms),
        };
        match self {
            FailurePolicy::Open => Decision::admitted(policy, &window),
            FailurePolicy::Closed => Decision::rejected(policy, &window, now),
        }
    }
}

/// Fixed-window rate limiter.
///
/// The limiter holds no counting state of its own; every window lives in the
/// injected store, so one store can be shared by several limiters and a
/// [`Sweeper`](super::Sweeper). This struct is thread-safe and can be shared
/// across threads behind an `Arc`.
pub struct Limiter<S: WindowStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    metrics: LimiterMetrics,
}

impl<S: WindowStore> Limiter<S> {
    /// Create a limiter over `store` using the system clock.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock::new()))
    }

    /// Create a limiter over `store` reading time from `clock`.
    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            metrics: LimiterMetrics::new(),
        }
    }

    /// Share an existing metrics handle, e.g. with a sweeper.
    pub fn with_metrics(mut self, metrics: LimiterMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Check and count a request for `identifier` at time `now`.
    ///
    /// An admitted request opens or advances the identifier's window; a
    /// rejected one leaves it untouched. A window whose `reset_at` equals
    /// `now` has ended, and the request opens a new one.
    pub fn check(&self, identifier: &str, policy: &Policy, now: Timestamp) -> Result<Decision> {
        policy.validate()?;

        trace!(key = %identifier, now = now.as_millis(), "Checking rate limit");

        let result = self.store.update(identifier, |slot| match slot {
            Some(window) if !window.is_expired(now) => {
                if window.count < policy.max_requests {
                    window.count += 1;
                    (Decision::admitted(policy, window), false)
                } else {
                    (Decision::rejected(policy, window, now), false)
                }
            }
            _ => {
                let window = Window::open(now, policy.window_ms);
                *slot = Some(window);
                (Decision::admitted(policy, &window), true)
            }
        });

        let (decision, opened) = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_store_unavailable() {
                    self.metrics.record_store_error();
                }
                return Err(e);
            }
        };

        if opened {
            debug!(
                key = %identifier,
                limit = policy.max_requests,
                window_ms = policy.window_ms,
                reset_at = %decision.reset_at,
                "Opened new rate limit window"
            );
        }

        if decision.allowed {
            self.metrics.record_allowed();
        } else {
            self.metrics.record_rejected();
            debug!(
                key = %identifier,
                limit = policy.max_requests,
                retry_after_secs = ?decision.retry_after_secs,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Check a request at the limiter clock's current time.
    pub fn check_now(&self, identifier: &str, policy: &Policy) -> Result<Decision> {
        self.check(identifier, policy, self.clock.now())
    }

    /// Like [`check`](Self::check), but turns an unavailable store into the
    /// decision chosen by `fallback`.
    ///
    /// Configuration errors are still returned.
    pub fn check_with_fallback(
        &self,
        identifier: &str,
        policy: &Policy,
        now: Timestamp,
        fallback: FailurePolicy,
    ) -> Result<Decision> {
        match self.check(identifier, policy, now) {
            Err(TurnstileError::StoreUnavailable(reason)) => {
                warn!(
                    key = %identifier,
                    fallback = ?fallback,
                    reason = %reason,
                    "Window store unavailable, applying fallback decision"
                );
                Ok(fallback.decide(policy, now))
            }
            other => other,
        }
    }

    /// The current window for an identifier, if one is stored.
    pub fn window(&self, identifier: &str) -> Result<Option<Window>> {
        self.store.get(identifier)
    }

    /// Forget an identifier's window, restoring its full budget.
    ///
    /// Returns `true` if a window was removed.
    pub fn reset(&self, identifier: &str) -> Result<bool> {
        let removed = self.store.remove(identifier)?.is_some();
        if removed {
            debug!(key = %identifier, "Reset rate limit window");
        }
        Ok(removed)
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The clock used by [`check_now`](Self::check_now).
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Counters for this limiter.
    pub fn metrics(&self) -> &LimiterMetrics {
        &self.metrics
    }
}
