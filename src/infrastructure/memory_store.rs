//! In-process window store.
//!
//! Windows live in a sharded concurrent map; the per-key entry lock makes
//! each admission batch atomic with respect to other callers of the same key.
//! Suitable for a single process; use the Redis store to share quotas across
//! instances.

use crate::application::ports::{StoreError, WindowStore};
use crate::domain::window::{WindowEntry, WindowTimestamp};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Admissions between sweeps of expired windows.
const SWEEP_INTERVAL: u64 = 1024;

#[derive(Debug, Default)]
struct Window {
    /// `(timestamp, member)` in insertion order
    entries: Vec<(WindowTimestamp, String)>,
    expires_at: Option<WindowTimestamp>,
}

impl Window {
    fn drop_through(&mut self, cutoff: WindowTimestamp) {
        self.entries.retain(|(ts, _)| *ts > cutoff);
    }
}

/// Thread-safe window store backed by DashMap.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, Window>,
    admissions: AtomicU64,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of caller windows currently held.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop windows whose expiry is at or before `now`.
    ///
    /// # Returns
    /// The number of windows removed.
    pub fn purge_expired(&self, now: WindowTimestamp) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| window.expires_at.map_or(true, |at| at > now));
        before.saturating_sub(self.windows.len())
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn admit_batch(
        &self,
        key: &str,
        entry: &WindowEntry,
        cutoff: WindowTimestamp,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let count = {
            let mut window = self.windows.entry(key.to_string()).or_default();
            if window.expires_at.is_some_and(|at| at <= entry.timestamp) {
                window.entries.clear();
            }
            window.drop_through(cutoff);
            let count = window.entries.len() as u64;
            window
                .entries
                .push((entry.timestamp, entry.member.clone()));
            window.expires_at = Some(entry.timestamp.offset(ttl));
            count
        };

        if self.admissions.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            let purged = self.purge_expired(entry.timestamp);
            if purged > 0 {
                tracing::debug!(purged, "purged expired rate limit windows");
            }
        }
        Ok(count)
    }

    async fn retract(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(mut window) = self.windows.get_mut(key) {
            window.entries.retain(|(_, m)| m != member);
        }
        Ok(())
    }

    async fn count(&self, key: &str, cutoff: WindowTimestamp) -> Result<u64, StoreError> {
        Ok(self
            .windows
            .get(key)
            .map(|window| {
                let live = window.expires_at.map_or(true, |at| at > cutoff);
                if live {
                    window.entries.iter().filter(|(ts, _)| *ts > cutoff).count() as u64
                } else {
                    0
                }
            })
            .unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.windows.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn at(secs: i64) -> WindowTimestamp {
        WindowTimestamp::from_micros(secs * 1_000_000)
    }

    #[tokio::test]
    async fn test_batch_returns_count_before_insert() {
        let store = MemoryWindowStore::new();
        let ttl = Duration::from_secs(60);

        assert_eq!(store.admit_batch("k", &WindowEntry::new(at(100)), at(40), ttl).await, Ok(0));
        assert_eq!(store.admit_batch("k", &WindowEntry::new(at(100)), at(40), ttl).await, Ok(1));
        assert_eq!(store.count("k", at(40)).await, Ok(2));
    }

    #[tokio::test]
    async fn test_cutoff_is_inclusive() {
        let store = MemoryWindowStore::new();
        let ttl = Duration::from_secs(60);
        store.admit_batch("k", &WindowEntry::new(at(10)), at(-50), ttl).await.unwrap();

        // An entry exactly at the cutoff is expired.
        assert_eq!(store.count("k", at(10)).await, Ok(0));
        assert_eq!(store.count("k", at(9)).await, Ok(1));
        assert_eq!(store.admit_batch("k", &WindowEntry::new(at(70)), at(10), ttl).await, Ok(0));
    }

    #[tokio::test]
    async fn test_retract_removes_only_its_member() {
        let store = MemoryWindowStore::new();
        let ttl = Duration::from_secs(60);
        let first = WindowEntry::new(at(5));
        let second = WindowEntry::new(at(5));
        store.admit_batch("k", &first, at(0), ttl).await.unwrap();
        store.admit_batch("k", &second, at(0), ttl).await.unwrap();

        store.retract("k", &second.member).await.unwrap();
        assert_eq!(store.count("k", at(0)).await, Ok(1));
        store.retract("missing", "nothing").await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_expired_windows() {
        let store = MemoryWindowStore::new();
        let ttl = Duration::from_secs(10);
        store.admit_batch("old", &WindowEntry::new(at(0)), at(-10), ttl).await.unwrap();
        store.admit_batch("new", &WindowEntry::new(at(8)), at(-2), ttl).await.unwrap();

        assert_eq!(store.purge_expired(at(10)), 1);
        assert_eq!(store.len(), 1);
        store.delete("new").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_batches_are_atomic() {
        let store = Arc::new(MemoryWindowStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .admit_batch("k", &WindowEntry::new(at(1)), at(0), Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }
        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (0..50).collect::<Vec<u64>>());
    }
}
