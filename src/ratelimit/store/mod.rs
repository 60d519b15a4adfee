//! Window storage.
//!
//! The store owns all window state. The limiter and sweeper only touch it
//! through [`WindowStore`], whose `update` and `remove_if` run inside the
//! store's per-identifier critical section.

mod indexed;
mod memory;

pub use indexed::{IndexedWindowStore, DEFAULT_SHARDS};
pub use memory::MemoryWindowStore;

use crate::config::{LimiterConfig, StoreKind};
use crate::error::Result;

use super::window::{Timestamp, Window};

/// Associative storage from identifier to its current window.
///
/// Every method that names an identifier is linearizable with respect to
/// other calls on the same identifier. Calls on different identifiers only
/// contend where the implementation shares a shard.
pub trait WindowStore: Send + Sync {
    /// Get a copy of the window for an identifier.
    fn get(&self, identifier: &str) -> Result<Option<Window>>;

    /// Insert or replace the window for an identifier.
    fn put(&self, identifier: &str, window: Window) -> Result<()>;

    /// Remove the window for an identifier, returning it if present.
    fn remove(&self, identifier: &str) -> Result<Option<Window>>;

    /// Atomically read and modify the slot for an identifier.
    ///
    /// The closure sees `None` when no window exists. Whatever it leaves in
    /// the slot is stored; leaving `None` removes the entry. No other update
    /// to the same identifier can interleave with the closure.
    fn update<F, R>(&self, identifier: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Option<Window>) -> R;

    /// Atomically remove the window if `predicate` holds for it.
    ///
    /// Returns `true` if an entry was removed.
    fn remove_if<F>(&self, identifier: &str, predicate: F) -> Result<bool>
    where
        F: FnOnce(&Window) -> bool;

    /// Identifiers whose window has ended at `now`.
    ///
    /// The result is a snapshot; a listed window may be replaced before the
    /// caller acts on it, so removal must go through `remove_if`.
    fn expired(&self, now: Timestamp) -> Result<Vec<String>>;

    /// Remove every window that has ended at `now`, returning how many were
    /// removed.
    fn sweep_expired(&self, now: Timestamp) -> Result<usize> {
        let mut removed = 0;
        for identifier in self.expired(now)? {
            if self.remove_if(&identifier, |window| window.is_expired(now))? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Number of stored windows.
    fn len(&self) -> usize;

    /// Whether the store holds no windows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all windows.
    fn clear(&self);
}

/// The in-process store selected by configuration.
#[derive(Debug)]
pub enum StoreBackend {
    /// DashMap-backed store with full-scan expiry
    Memory(MemoryWindowStore),
    /// Sharded store with an expiry index per shard
    Indexed(IndexedWindowStore),
}

impl StoreBackend {
    /// Build the store described by the limiter configuration.
    pub fn from_config(config: &LimiterConfig) -> Self {
        match config.store {
            StoreKind::Memory => StoreBackend::Memory(MemoryWindowStore::new()),
            StoreKind::Indexed => {
                StoreBackend::Indexed(IndexedWindowStore::with_shards(config.shards))
            }
        }
    }
}

impl WindowStore for StoreBackend {
    fn get(&self, identifier: &str) -> Result<Option<Window>> {
        match self {
            StoreBackend::Memory(store) => store.get(identifier),
            StoreBackend::Indexed(store) => store.get(identifier),
        }
    }

    fn put(&self, identifier: &str, window: Window) -> Result<()> {
        match self {
            StoreBackend::Memory(store) => store.put(identifier, window),
            StoreBackend::Indexed(store) => store.put(identifier, window),
        }
    }

    fn remove(&self, identifier: &str) -> Result<Option<Window>> {
        match self {
            StoreBackend::Memory(store) => store.remove(identifier),
            StoreBackend::Indexed(store) => store.remove(identifier),
        }
    }

    fn update<F, R>(&self, identifier: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Option<Window>) -> R,
    {
        match self {
            StoreBackend::Memory(store) => store.update(identifier, f),
            StoreBackend::Indexed(store) => store.update(identifier, f),
        }
    }

    fn remove_if<F>(&self, identifier: &str, predicate: F) -> Result<bool>
    where
        F: FnOnce(&Window) -> bool,
    {
        match self {
            StoreBackend::Memory(store) => store.remove_if(identifier, predicate),
            StoreBackend::Indexed(store) => store.remove_if(identifier, predicate),
        }
    }

    fn expired(&self, now: Timestamp) -> Result<Vec<String>> {
        match self {
            StoreBackend::Memory(store) => store.expired(now),
            StoreBackend::Indexed(store) => store.expired(now),
        }
    }

    fn sweep_expired(&self, now: Timestamp) -> Result<usize> {
        match self {
            StoreBackend::Memory(store) => store.sweep_expired(now),
            StoreBackend::Indexed(store) => store.sweep_expired(now),
        }
    }

    fn len(&self) -> usize {
        match self {
            StoreBackend::Memory(store) => store.len(),
            StoreBackend::Indexed(store) => store.len(),
        }
    }

    fn clear(&self) {
        match self {
            StoreBackend::Memory(store) => store.clear(),
            StoreBackend::Indexed(store) => store.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(count: u64, reset_at: u64) -> Window {
        Window {
            count,
            reset_at: Timestamp::from_millis(reset_at),
        }
    }

    #[test]
    fn test_backend_from_config() {
        let mut config = LimiterConfig::default();
        config.store = StoreKind::Memory;
        assert!(matches!(
            StoreBackend::from_config(&config),
            StoreBackend::Memory(_)
        ));

        config.store = StoreKind::Indexed;
        config.shards = 4;
        match StoreBackend::from_config(&config) {
            StoreBackend::Indexed(store) => assert_eq!(store.shard_count(), 4),
            other => panic!("expected indexed store, got {:?}", other),
        }
    }

    #[test]
    fn test_backend_delegates() {
        for kind in [StoreKind::Memory, StoreKind::Indexed] {
            let config = LimiterConfig {
                store: kind,
                ..LimiterConfig::default()
            };
            let store = StoreBackend::from_config(&config);

            store.put("a", window(1, 100)).unwrap();
            store.put("b", window(1, 500)).unwrap();
            assert_eq!(store.len(), 2);
            assert_eq!(store.get("a").unwrap(), Some(window(1, 100)));

            assert_eq!(store.expired(Timestamp::from_millis(100)).unwrap(), vec!["a"]);
            assert_eq!(store.sweep_expired(Timestamp::from_millis(100)).unwrap(), 1);
            assert_eq!(store.len(), 1);

            store.clear();
            assert!(store.is_empty());
        }
    }
}
