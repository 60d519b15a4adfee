//! DashMap-backed window store.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::WindowStore;
use crate::error::Result;
use crate::ratelimit::window::{Timestamp, Window};

/// Concurrent window store backed by `DashMap`.
///
/// Each identifier hashes to one of DashMap's internal shards, and `update`
/// holds that shard's write lock through the entry API. Finding expired
/// windows scans every entry, so this store suits small key spaces; prefer
/// [`IndexedWindowStore`](super::IndexedWindowStore) when identifiers churn.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, Window>,
}

impl MemoryWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Create an empty store with room for `capacity` identifiers.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            windows: DashMap::with_capacity(capacity),
        }
    }

    /// Entry-based update for identifiers that were absent on the fast path.
    fn update_entry<F, R>(&self, identifier: &str, f: F) -> R
    where
        F: FnOnce(&mut Option<Window>) -> R,
    {
        match self.windows.entry(identifier.to_owned()) {
            Entry::Occupied(mut entry) => {
                let mut slot = Some(*entry.get());
                let result = f(&mut slot);
                match slot {
                    Some(window) => *entry.get_mut() = window,
                    None => {
                        entry.remove();
                    }
                }
                result
            }
            Entry::Vacant(entry) => {
                let mut slot = None;
                let result = f(&mut slot);
                if let Some(window) = slot {
                    entry.insert(window);
                }
                result
            }
        }
    }
}

impl WindowStore for MemoryWindowStore {
    fn get(&self, identifier: &str) -> Result<Option<Window>> {
        Ok(self.windows.get(identifier).map(|w| *w))
    }

    fn put(&self, identifier: &str, window: Window) -> Result<()> {
        self.windows.insert(identifier.to_owned(), window);
        Ok(())
    }

    fn remove(&self, identifier: &str) -> Result<Option<Window>> {
        Ok(self.windows.remove(identifier).map(|(_, w)| w))
    }

    fn update<F, R>(&self, identifier: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Option<Window>) -> R,
    {
        // Existing keys are updated under the shard lock without allocating
        // an owned key.
        let mut f = Some(f);
        let mut result = None;
        self.windows.remove_if_mut(identifier, |_, window| {
            let Some(f) = f.take() else {
                return false;
            };
            let mut slot = Some(*window);
            result = Some(f(&mut slot));
            match slot {
                Some(updated) => {
                    *window = updated;
                    false
                }
                None => true,
            }
        });

        match (result, f) {
            (Some(result), _) => Ok(result),
            (None, Some(f)) => Ok(self.update_entry(identifier, f)),
            (None, None) => unreachable!("update closure consumed without a result"),
        }
    }

    fn remove_if<F>(&self, identifier: &str, predicate: F) -> Result<bool>
    where
        F: FnOnce(&Window) -> bool,
    {
        Ok(self
            .windows
            .remove_if(identifier, |_, window| predicate(window))
            .is_some())
    }

    fn expired(&self, now: Timestamp) -> Result<Vec<String>> {
        Ok(self
            .windows
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }

    fn clear(&self) {
        self.windows.clear();
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
    fn test_put_get_remove() {
        let store = MemoryWindowStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.put("a", window(1, 1_000)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(window(1, 1_000)));
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove("a").unwrap(), Some(window(1, 1_000)));
        assert_eq!(store.remove("a").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_creates_mutates_and_clears() {
        let store = MemoryWindowStore::with_capacity(8);

        let seen = store
            .update("a", |slot| {
                let seen = slot.is_some();
                *slot = Some(window(1, 1_000));
                seen
            })
            .unwrap();
        assert!(!seen);

        store
            .update("a", |slot| {
                if let Some(w) = slot.as_mut() {
                    w.count += 1;
                }
            })
            .unwrap();
        assert_eq!(store.get("a").unwrap(), Some(window(2, 1_000)));

        store.update("a", |slot| *slot = None).unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_update_runs_closure_once_per_call() {
        let store = MemoryWindowStore::new();
        let mut calls = 0;

        store
            .update("a", |slot| {
                calls += 1;
                *slot = Some(window(1, 1_000));
            })
            .unwrap();
        store
            .update("a", |slot| {
                calls += 1;
                if let Some(w) = slot.as_mut() {
                    w.count += 1;
                }
            })
            .unwrap();
        store.update("a", |_| calls += 1).unwrap();

        assert_eq!(calls, 3);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap(), Some(window(2, 1_000)));
    }

    #[test]
    fn test_update_leaving_vacant_slot_stores_nothing() {
        let store = MemoryWindowStore::new();
        store.update("a", |_| ()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_if_respects_predicate() {
        let store = MemoryWindowStore::new();
        store.put("a", window(3, 1_000)).unwrap();

        assert!(!store.remove_if("a", |w| w.count > 5).unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.remove_if("a", |w| w.count == 3).unwrap());
        assert!(store.is_empty());
        assert!(!store.remove_if("missing", |_| true).unwrap());
    }

    #[test]
    fn test_expired_and_sweep() {
        let store = MemoryWindowStore::new();
        store.put("old", window(1, 100)).unwrap();
        store.put("edge", window(1, 200)).unwrap();
        store.put("live", window(1, 300)).unwrap();

        let now = Timestamp::from_millis(200);
        let mut expired = store.expired(now).unwrap();
        expired.sort();
        assert_eq!(expired, vec!["edge".to_string(), "old".to_string()]);

        assert_eq!(store.sweep_expired(now).unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("live").unwrap().is_some());
    }

    #[test]
    fn test_clear() {
        let store = MemoryWindowStore::new();
        store.put("a", window(1, 100)).unwrap();
        store.put("b", window(1, 100)).unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
