//! Concurrent cache with single-flight initialization.
//!
//! Each key owns a once-cell registered in the map before its value is
//! computed. Concurrent callers for the same key await the same cell, so the
//! initializer runs once. A failed initializer leaves the cell empty and the
//! next caller tries again.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug)]
pub struct SingleFlight<K, V>
where
    K: Eq + Hash,
{
    cells: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    /// Return the value for `key`, running `init` if no caller has produced
    /// one yet.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // Clone the cell out so no map guard is held across the await.
        let cell = self.cells.entry(key).or_default().clone();
        cell.get_or_try_init(init).await.cloned()
    }

    /// The value for `key`, if initialized.
    pub fn get(&self, key: &K) -> Option<V> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// Callers already awaiting the previous cell keep their result.
    pub fn replace(&self, key: K, value: V) -> Option<V> {
        self.cells
            .insert(key, Arc::new(OnceCell::from(value)))
            .and_then(|old| old.get().cloned())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.cells
            .remove(key)
            .and_then(|(_, cell)| cell.get().cloned())
    }

    /// Initialized entries.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.cells
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .get()
                    .map(|value| (entry.key().clone(), value.clone()))
            })
            .collect()
    }

    /// Number of initialized entries.
    pub fn len(&self) -> usize {
        self.cells
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cells.clear();
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
