//! Keyed mutual exclusion
//!
//! One async mutex per key, created on demand and dropped once no task holds
//! or waits for it. Used for single in-flight ingestion per document and for
//! serializing resolution of a shared entity.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

pub struct KeyedLock<K> {
    slots: Mutex<HashMap<K, Slot>>,
}

impl<K> Default for KeyedLock<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

/// Held lock on one key
pub struct KeyedGuard<'a, K: Eq + Hash + Clone> {
    owner: &'a KeyedLock<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

/// Held locks on several keys, acquired in sorted order
pub struct KeyedGuards<'a, K: Eq + Hash + Clone> {
    guards: Vec<KeyedGuard<'a, K>>,
}

impl<K: Eq + Hash + Clone> KeyedGuards<'_, K> {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl<K: Eq + Hash + Clone + Ord> KeyedLock<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        KeyedGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    /// Lock every distinct key in `keys`
    ///
    /// Keys are taken in ascending order so two callers with overlapping
    /// sets cannot deadlock.
    pub async fn lock_many<I>(&self, keys: I) -> KeyedGuards<'_, K>
    where
        I: IntoIterator<Item = K>,
    {
        let ordered: BTreeSet<K> = keys.into_iter().collect();
        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            guards.push(self.lock(key).await);
        }
        KeyedGuards { guards }
    }

    /// Keys currently held or awaited
    pub fn active_keys(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.owner.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map holds the slot once nobody waits on it
        if let Some(slot) = slots.get(&self.key) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.key);
            }
        }
    }
}
