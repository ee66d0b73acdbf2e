//! Window store that is always unreachable.

use crate::application::ports::{StoreError, WindowStore};
use crate::domain::window::{WindowEntry, WindowTimestamp};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fails every call, counting how often it was consulted.
#[derive(Debug, Default)]
pub struct FailingWindowStore {
    calls: AtomicUsize,
}

impl FailingWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of store calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> StoreError {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StoreError::Unavailable("connection refused".to_string())
    }
}

#[async_trait]
impl WindowStore for FailingWindowStore {
    async fn admit_batch(
        &self,
        _key: &str,
        _entry: &WindowEntry,
        _cutoff: WindowTimestamp,
        _ttl: Duration,
    ) -> Result<u64, StoreError> {
        Err(self.fail())
    }

    async fn retract(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        Err(self.fail())
    }

    async fn count(&self, _key: &str, _cutoff: WindowTimestamp) -> Result<u64, StoreError> {
        Err(self.fail())
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(self.fail())
    }
}
