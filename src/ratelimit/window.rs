//! Counting window state.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// An absolute point in time, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Create a timestamp from milliseconds since the Unix epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the Unix epoch.
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Add a number of milliseconds, saturating at the maximum timestamp.
    pub fn saturating_add_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Milliseconds from `earlier` to `self`, or zero if `earlier` is later.
    pub fn millis_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Duration from `earlier` to `self`, or zero if `earlier` is later.
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.millis_since(earlier))
    }

    /// Convert to a UTC date-time. Returns `None` outside chrono's range.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let millis = i64::try_from(self.0).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        // Pre-epoch instants clamp to the epoch.
        Self(u64::try_from(dt.timestamp_millis()).unwrap_or(0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Per-identifier counting window.
///
/// `count` may equal the policy's limit once the limit is reached; it is never
/// advanced past the limit by the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Requests admitted in this window
    pub count: u64,
    /// When this window ends and the next check opens a fresh one
    pub reset_at: Timestamp,
}

impl Window {
    /// Open a fresh window at `now` holding the first admitted request.
    ///
    /// `reset_at` saturates at `u64::MAX` milliseconds, so a window opened
    /// within `window_ms` of that instant is shorter than requested, and one
    /// opened at `u64::MAX` itself is already expired.
    pub fn open(now: Timestamp, window_ms: u64) -> Self {
        Self {
            count: 1,
            reset_at: now.saturating_add_millis(window_ms),
        }
    }

    /// Whether the window has ended. The boundary itself counts as expired.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.reset_at
    }

    /// Whole seconds until the window resets, rounded up.
    pub fn retry_after_secs(&self, now: Timestamp) -> u64 {
        self.reset_at.millis_since(now).div_ceil(1000)
    }
}
