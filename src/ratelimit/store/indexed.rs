//! Sharded window store with per-shard expiry indexes.

use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::BuildHasher;
use tracing::trace;

use super::WindowStore;
use crate::error::Result;
use crate::ratelimit::window::{Timestamp, Window};

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 64;

/// Window store that can reclaim expired entries without scanning live ones.
///
/// Identifiers hash to one of a fixed number of shards. Each shard keeps its
/// windows together with a `(reset_at, identifier)` index ordered by expiry,
/// both behind one mutex, so sweeping a shard walks only the expired prefix of
/// its index.
pub struct IndexedWindowStore {
    shards: Box<[Mutex<Shard>]>,
    hasher: RandomState,
}

#[derive(Default)]
struct Shard {
    windows: HashMap<String, Window>,
    expiry: BTreeSet<(Timestamp, String)>,
}

impl Shard {
    /// Store `window`, keeping the expiry index in step.
    fn set(&mut self, identifier: &str, window: Window) {
        match self.windows.get_mut(identifier) {
            Some(slot) => {
                let previous = std::mem::replace(slot, window);
                if previous.reset_at != window.reset_at {
                    self.expiry
                        .remove(&(previous.reset_at, identifier.to_owned()));
                    self.expiry.insert((window.reset_at, identifier.to_owned()));
                }
            }
            None => {
                self.windows.insert(identifier.to_owned(), window);
                self.expiry.insert((window.reset_at, identifier.to_owned()));
            }
        }
    }

    fn take(&mut self, identifier: &str) -> Option<Window> {
        let window = self.windows.remove(identifier)?;
        self.expiry.remove(&(window.reset_at, identifier.to_owned()));
        Some(window)
    }

    fn drain_expired(&mut self, now: Timestamp) -> usize {
        let mut removed = 0;
        while self
            .expiry
            .first()
            .is_some_and(|(reset_at, _)| *reset_at <= now)
        {
            if let Some((_, identifier)) = self.expiry.pop_first() {
                self.windows.remove(&identifier);
                removed += 1;
            }
        }
        removed
    }
}

impl IndexedWindowStore {
    /// Create a store with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a store with `shards` shards (at least one).
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(Shard::default()))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, identifier: &str) -> MutexGuard<'_, Shard> {
        let index = (self.hasher.hash_one(identifier) % self.shards.len() as u64) as usize;
        self.shards[index].lock()
    }
}

impl Default for IndexedWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IndexedWindowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedWindowStore")
            .field("shards", &self.shards.len())
            .field("windows", &self.len())
            .finish()
    }
}

impl WindowStore for IndexedWindowStore {
    fn get(&self, identifier: &str) -> Result<Option<Window>> {
        Ok(self.shard(identifier).windows.get(identifier).copied())
    }

    fn put(&self, identifier: &str, window: Window) -> Result<()> {
        self.shard(identifier).set(identifier, window);
        Ok(())
    }

    fn remove(&self, identifier: &str) -> Result<Option<Window>> {
        Ok(self.shard(identifier).take(identifier))
    }

    fn update<F, R>(&self, identifier: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Option<Window>) -> R,
    {
        let mut shard = self.shard(identifier);
        let previous = shard.windows.get(identifier).copied();
        let mut slot = previous;
        let result = f(&mut slot);

        if slot != previous {
            match slot {
                Some(window) => shard.set(identifier, window),
                None => {
                    shard.take(identifier);
                }
            }
        }
        Ok(result)
    }

    fn remove_if<F>(&self, identifier: &str, predicate: F) -> Result<bool>
    where
        F: FnOnce(&Window) -> bool,
    {
        let mut shard = self.shard(identifier);
        let matched = shard.windows.get(identifier).is_some_and(predicate);
        if matched {
            shard.take(identifier);
        }
        Ok(matched)
    }

    fn expired(&self, now: Timestamp) -> Result<Vec<String>> {
        let mut expired = Vec::new();
        for shard in self.shards.iter() {
            let shard = shard.lock();
            expired.extend(
                shard
                    .expiry
                    .iter()
                    .take_while(|(reset_at, _)| *reset_at <= now)
                    .map(|(_, identifier)| identifier.clone()),
            );
        }
        Ok(expired)
    }

    /// Drains each shard's expired prefix under that shard's lock, one shard
    /// at a time.
    fn sweep_expired(&self, now: Timestamp) -> Result<usize> {
        let mut removed = 0;
        for (index, shard) in self.shards.iter().enumerate() {
            let drained = shard.lock().drain_expired(now);
            if drained > 0 {
                trace!(shard = index, removed = drained, "Drained expired windows");
            }
            removed += drained;
        }
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().windows.len()).sum()
    }

    fn clear(&self) {
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.windows.clear();
            shard.expiry.clear();
        }
    }
}
