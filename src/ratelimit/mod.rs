//! Rate limiting logic and state management.

mod clock;
mod key;
mod limiter;
mod metrics;
mod policy;
mod store;
mod sweeper;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::RateLimitKey;
pub use limiter::{Decision, FailurePolicy, Limiter};
pub use metrics::{LimiterMetrics, MetricsSnapshot};
pub use policy::{Policy, PolicySet, DEFAULT_POLICY, STRICT_POLICY};
pub use store::{
    IndexedWindowStore, MemoryWindowStore, StoreBackend, WindowStore, DEFAULT_SHARDS,
};
pub use sweeper::{SweepReport, Sweeper, SweeperHandle};
pub use window::{Timestamp, Window};
