//! Sliding-window rate limiter.
//!
//! The limiter owns no window state; every decision is one atomic batch
//! against the shared [`WindowStore`], so the quota holds across processes
//! sharing the store.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::metrics::ServingMetrics;
use crate::application::ports::{Clock, StoreError, WindowStore};
use crate::domain::window::{
    AdmissionDecision, RateStatus, WindowEntry, WindowPolicy, WindowTimestamp,
};
use std::sync::Arc;

/// Coordinates admission decisions against a shared window store.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
    metrics: ServingMetrics,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl SlidingWindowLimiter {
    /// Create a new limiter.
    ///
    /// # Arguments
    /// * `store` - Shared window store
    /// * `clock` - Source of entry timestamps
    /// * `metrics` - Metrics tracker
    /// * `circuit_breaker` - Breaker guarding store calls
    pub fn new(
        store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
        metrics: ServingMetrics,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
            circuit_breaker,
        }
    }

    fn now(&self) -> WindowTimestamp {
        WindowTimestamp::from_system_time(self.clock.now())
    }

    /// Decide whether `identifier` may make another request under `policy`.
    ///
    /// # Fail-Open Behavior
    /// If the store fails, or the circuit breaker is open after repeated
    /// failures, the request is admitted as [`AdmissionDecision::FailedOpen`].
    pub async fn admit(&self, identifier: &str, policy: &WindowPolicy) -> AdmissionDecision {
        if !self.circuit_breaker.allow_request() {
            tracing::debug!(identifier, "window store circuit open, failing open");
            self.metrics.record_failed_open();
            return AdmissionDecision::FailedOpen;
        }

        let now = self.now();
        let entry = WindowEntry::new(now);
        let batch = self
            .store
            .admit_batch(identifier, &entry, policy.cutoff(now), policy.window())
            .await;

        let count_before = match batch {
            Ok(count) => {
                self.circuit_breaker.record_success();
                count
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                self.metrics.record_failed_open();
                tracing::warn!(error = %e, identifier, "window store unavailable, failing open");
                return AdmissionDecision::FailedOpen;
            }
        };

        if policy.decide(count_before) {
            self.metrics.record_admitted();
            return AdmissionDecision::Admitted;
        }

        // Over quota: the entry written by the batch must not count.
        if let Err(e) = self.store.retract(identifier, &entry.member).await {
            tracing::warn!(
                error = %e,
                identifier,
                "failed to retract denied window entry, it will expire with the window"
            );
        }
        self.metrics.record_denied();
        tracing::debug!(identifier, count = count_before, limit = policy.limit(), "request denied");
        AdmissionDecision::Denied
    }

    /// Current quota usage for `identifier`. Never modifies the window.
    ///
    /// Reports an empty window when the store cannot be read.
    pub async fn status(&self, identifier: &str, policy: &WindowPolicy) -> RateStatus {
        let cutoff = policy.cutoff(self.now());
        match self.store.count(identifier, cutoff).await {
            Ok(count) => policy.status(count),
            Err(e) => {
                tracing::warn!(error = %e, identifier, "window store unavailable for status");
                policy.status(0)
            }
        }
    }

    /// Clear `identifier`'s window unconditionally.
    pub async fn reset(&self, identifier: &str) -> Result<(), StoreError> {
        self.store.delete(identifier).await?;
        tracing::info!(identifier, "rate limit window reset");
        Ok(())
    }

    pub fn metrics(&self) -> &ServingMetrics {
        &self.metrics
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::infrastructure::memory_store::MemoryWindowStore;
    use crate::infrastructure::mocks::{FailingWindowStore, MockClock};
    use std::time::Duration;

    fn limiter_with(store: Arc<dyn WindowStore>, clock: &MockClock) -> SlidingWindowLimiter {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        SlidingWindowLimiter::new(
            store,
            clock.clone(),
            ServingMetrics::new(),
            Arc::new(CircuitBreaker::new(
                CircuitBreakerConfig {
                    failure_threshold: 2,
                    recovery_timeout: Duration::from_secs(30),
                },
                clock,
            )),
        )
    }

    #[tokio::test]
    async fn test_last_admission_reaches_limit() {
        let clock = MockClock::new();
        let limiter = limiter_with(Arc::new(MemoryWindowStore::new()), &clock);
        let policy = WindowPolicy::per_seconds(3, 60).unwrap();

        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(limiter.admit("ip1", &policy).await.is_allowed());
            clock.advance(Duration::from_millis(100));
        }
        assert_eq!(results, [true, true, true, false]);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let clock = MockClock::new();
        let limiter = limiter_with(Arc::new(MemoryWindowStore::new()), &clock);
        let policy = WindowPolicy::per_seconds(2, 10).unwrap();

        assert!(limiter.admit("caller", &policy).await.is_allowed());
        clock.advance(Duration::from_secs(5));
        assert!(limiter.admit("caller", &policy).await.is_allowed());
        assert!(limiter.admit("caller", &policy).await.is_denied());

        // First entry is now exactly one window old and expires.
        clock.advance(Duration::from_secs(5));
        assert!(limiter.admit("caller", &policy).await.is_allowed());
        assert!(limiter.admit("caller", &policy).await.is_denied());
    }

    #[tokio::test]
    async fn test_denied_requests_do_not_count() {
        let clock = MockClock::new();
        let limiter = limiter_with(Arc::new(MemoryWindowStore::new()), &clock);
        let policy = WindowPolicy::per_seconds(1, 10).unwrap();

        assert!(limiter.admit("caller", &policy).await.is_allowed());
        for _ in 0..5 {
            assert!(limiter.admit("caller", &policy).await.is_denied());
        }
        assert_eq!(limiter.status("caller", &policy).await.count, 1);
    }

    #[tokio::test]
    async fn test_status_is_read_only() {
        let clock = MockClock::new();
        let limiter = limiter_with(Arc::new(MemoryWindowStore::new()), &clock);
        let policy = WindowPolicy::per_seconds(2, 60).unwrap();

        assert!(limiter.admit("caller", &policy).await.is_allowed());
        for _ in 0..10 {
            let status = limiter.status("caller", &policy).await;
            assert_eq!(status.count, 1);
            assert_eq!(status.remaining, 1);
        }
        assert!(limiter.admit("caller", &policy).await.is_allowed());
        assert!(limiter.admit("caller", &policy).await.is_denied());
    }

    #[tokio::test]
    async fn test_reset_clears_window() {
        let clock = MockClock::new();
        let limiter = limiter_with(Arc::new(MemoryWindowStore::new()), &clock);
        let policy = WindowPolicy::per_seconds(1, 60).unwrap();

        assert!(limiter.admit("caller", &policy).await.is_allowed());
        assert!(limiter.admit("caller", &policy).await.is_denied());
        limiter.reset("caller").await.unwrap();
        assert!(limiter.admit("caller", &policy).await.is_allowed());
    }

    #[tokio::test]
    async fn test_fails_open_and_trips_breaker() {
        let clock = MockClock::new();
        let store = Arc::new(FailingWindowStore::new());
        let limiter = limiter_with(store.clone(), &clock);
        let policy = WindowPolicy::per_seconds(1, 60).unwrap();

        for _ in 0..2 {
            assert_eq!(
                limiter.admit("caller", &policy).await,
                AdmissionDecision::FailedOpen
            );
        }
        assert_eq!(limiter.circuit_breaker().state(), CircuitState::Open);
        assert_eq!(store.calls(), 2);

        // Open circuit: the store is not consulted at all.
        assert_eq!(
            limiter.admit("caller", &policy).await,
            AdmissionDecision::FailedOpen
        );
        assert_eq!(store.calls(), 2);
        assert_eq!(limiter.metrics().snapshot().failed_open, 3);
        assert_eq!(limiter.status("caller", &policy).await.count, 0);
    }
}
