//! In-process serving metrics.
//!
//! Counters are plain atomics shared behind an `Arc`; clones observe the
//! same values. Exporting them is left to the embedding service.

use crate::domain::model::Provenance;
use crate::domain::outcome::RejectionKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters describing admission, resolution, prediction and explanation
/// activity.
#[derive(Debug, Clone, Default)]
pub struct ServingMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    admitted: AtomicU64,
    denied: AtomicU64,
    failed_open: AtomicU64,
    predictions_succeeded: AtomicU64,
    rejected_validation: AtomicU64,
    rejected_rate_limited: AtomicU64,
    rejected_model_unavailable: AtomicU64,
    rejected_prediction_failed: AtomicU64,
    rejected_prediction_timeout: AtomicU64,
    resolved_registry: AtomicU64,
    resolved_local_file: AtomicU64,
    resolved_synthetic_stub: AtomicU64,
    explanations_produced: AtomicU64,
    explanations_unavailable: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl ServingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        bump(&self.inner.admitted);
    }

    pub(crate) fn record_denied(&self) {
        bump(&self.inner.denied);
    }

    pub(crate) fn record_failed_open(&self) {
        bump(&self.inner.failed_open);
    }

    pub(crate) fn record_prediction(&self) {
        bump(&self.inner.predictions_succeeded);
    }

    pub(crate) fn record_rejection(&self, kind: RejectionKind) {
        bump(self.rejection_counter(kind));
    }

    pub(crate) fn record_resolution(&self, provenance: Provenance) {
        bump(match provenance {
            Provenance::Registry => &self.inner.resolved_registry,
            Provenance::LocalFile => &self.inner.resolved_local_file,
            Provenance::SyntheticStub => &self.inner.resolved_synthetic_stub,
        });
    }

    pub(crate) fn record_explanation(&self, produced: bool) {
        if produced {
            bump(&self.inner.explanations_produced);
        } else {
            bump(&self.inner.explanations_unavailable);
        }
    }

    /// Rejections of a single kind.
    pub fn rejections(&self, kind: RejectionKind) -> u64 {
        read(self.rejection_counter(kind))
    }

    fn rejection_counter(&self, kind: RejectionKind) -> &AtomicU64 {
        match kind {
            RejectionKind::Validation => &self.inner.rejected_validation,
            RejectionKind::RateLimited => &self.inner.rejected_rate_limited,
            RejectionKind::ModelUnavailable => &self.inner.rejected_model_unavailable,
            RejectionKind::PredictionFailed => &self.inner.rejected_prediction_failed,
            RejectionKind::PredictionTimeout => &self.inner.rejected_prediction_timeout,
        }
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            admitted: read(&inner.admitted),
            denied: read(&inner.denied),
            failed_open: read(&inner.failed_open),
            predictions_succeeded: read(&inner.predictions_succeeded),
            rejections: RejectionKind::ALL
                .iter()
                .map(|kind| self.rejections(*kind))
                .sum(),
            resolved_registry: read(&inner.resolved_registry),
            resolved_local_file: read(&inner.resolved_local_file),
            resolved_synthetic_stub: read(&inner.resolved_synthetic_stub),
            explanations_produced: read(&inner.explanations_produced),
            explanations_unavailable: read(&inner.explanations_unavailable),
        }
    }
}

/// A point-in-time copy of [`ServingMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub denied: u64,
    /// Requests let through because the window store was unreachable
    pub failed_open: u64,
    pub predictions_succeeded: u64,
    /// Rejections of every kind
    pub rejections: u64,
    pub resolved_registry: u64,
    pub resolved_local_file: u64,
    pub resolved_synthetic_stub: u64,
    pub explanations_produced: u64,
    pub explanations_unavailable: u64,
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

impl MetricsSnapshot {
    /// Admission checks of any result.
    pub fn total_admissions(&self) -> u64 {
        self.admitted
            .saturating_add(self.denied)
            .saturating_add(self.failed_open)
    }

    /// Share of admission checks that were denied (0.0 to 1.0).
    pub fn denial_rate(&self) -> f64 {
        ratio(self.denied, self.total_admissions())
    }

    /// Share of admission checks decided without the store.
    pub fn fail_open_rate(&self) -> f64 {
        ratio(self.failed_open, self.total_admissions())
    }

    /// Share of model resolutions served by the synthetic stub.
    pub fn degraded_resolution_rate(&self) -> f64 {
        let total = self.resolved_registry + self.resolved_local_file + self.resolved_synthetic_stub;
        ratio(self.resolved_synthetic_stub, total)
    }

    /// Share of requested explanations that were produced.
    pub fn explanation_success_rate(&self) -> f64 {
        ratio(
            self.explanations_produced,
            self.explanations_produced + self.explanations_unavailable,
        )
    }
}
