//! Explainer selection, caching and rendering.
//!
//! Explainers are cached per model identity, so a model reloaded under the
//! same version gets a fresh explainer. Explanation is best effort: every
//! failure is logged and surfaces as `None`.

use crate::application::metrics::ServingMetrics;
use crate::application::single_flight::SingleFlight;
use crate::domain::attribution::{AttributionError, Explainer, KernelConfig};
use crate::domain::explanation::{
    rank_contributions, summarize, ExplainerStrategy, Explanation, FeatureContribution,
    GlobalImportance,
};
use crate::domain::model::{ModelHandle, ModelId};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
enum ExplainFailure {
    #[error(transparent)]
    Attribution(#[from] AttributionError),
    #[error("{names} feature names for {values} values")]
    NameMismatch { names: usize, values: usize },
    #[error("explanation task failed: {0}")]
    Task(#[from] JoinError),
}

#[derive(Debug)]
pub struct ExplainerManager {
    explainers: SingleFlight<ModelId, Arc<Explainer>>,
    kernel: KernelConfig,
    metrics: ServingMetrics,
}

impl ExplainerManager {
    pub fn new(kernel: KernelConfig, metrics: ServingMetrics) -> Self {
        Self {
            explainers: SingleFlight::new(),
            kernel,
            metrics,
        }
    }

    /// Strategy used for `handle`, from its structure tag.
    pub fn strategy(&self, handle: &ModelHandle) -> ExplainerStrategy {
        ExplainerStrategy::from_structure(handle.structure)
    }

    /// Per-feature attribution of the prediction for `features`.
    ///
    /// Returns the `max_display` largest contributions by magnitude.
    pub async fn explain(
        &self,
        handle: &ModelHandle,
        features: &[f64],
        feature_names: &[String],
        max_display: usize,
    ) -> Option<Explanation> {
        let result = self
            .try_explain(handle, features, feature_names, max_display)
            .await;
        self.metrics.record_explanation(result.is_ok());
        match result {
            Ok(explanation) => Some(explanation),
            Err(e) => {
                tracing::warn!(
                    model = %handle.id(),
                    strategy = %self.strategy(handle),
                    error = %e,
                    "explanation unavailable"
                );
                None
            }
        }
    }

    async fn try_explain(
        &self,
        handle: &ModelHandle,
        features: &[f64],
        feature_names: &[String],
        max_display: usize,
    ) -> Result<Explanation, ExplainFailure> {
        if feature_names.len() != features.len() {
            return Err(ExplainFailure::NameMismatch {
                names: feature_names.len(),
                values: features.len(),
            });
        }
        let explainer = self.explainer(handle, Vec::new()).await?;
        let x = features.to_vec();
        let attribution = {
            let explainer = Arc::clone(&explainer);
            tokio::task::spawn_blocking(move || explainer.shap_values(&x)).await??
        };

        let (values, base_value) = attribution.first_channel();
        let mut contributions: Vec<FeatureContribution> = feature_names
            .iter()
            .zip(features)
            .zip(values)
            .map(|((name, value), phi)| FeatureContribution::new(name.clone(), *value, *phi))
            .collect();
        let total_impact = values.iter().sum();
        rank_contributions(&mut contributions);
        contributions.truncate(max_display);

        Ok(Explanation {
            summary: summarize(&contributions),
            contributions,
            base_value,
            total_impact,
            strategy: explainer.strategy(),
        })
    }

    /// Mean absolute contribution per feature over the first `n_samples`
    /// rows of `background`.
    pub async fn global_importance(
        &self,
        handle: &ModelHandle,
        background: &[Vec<f64>],
        feature_names: &[String],
        n_samples: usize,
    ) -> Option<GlobalImportance> {
        match self
            .try_global_importance(handle, background, feature_names, n_samples)
            .await
        {
            Ok(importance) => Some(importance),
            Err(e) => {
                tracing::warn!(model = %handle.id(), error = %e, "global importance unavailable");
                None
            }
        }
    }

    async fn try_global_importance(
        &self,
        handle: &ModelHandle,
        background: &[Vec<f64>],
        feature_names: &[String],
        n_samples: usize,
    ) -> Result<GlobalImportance, ExplainFailure> {
        if feature_names.len() != handle.model.n_features() {
            return Err(ExplainFailure::NameMismatch {
                names: feature_names.len(),
                values: handle.model.n_features(),
            });
        }
        let rows: Vec<Vec<f64>> = background.iter().take(n_samples).cloned().collect();
        let fallback: Vec<Vec<f64>> = rows.iter().take(self.kernel.max_background).cloned().collect();
        let explainer = self.explainer(handle, fallback).await?;

        let samples = rows.len();
        let totals = tokio::task::spawn_blocking(move || {
            let mut totals = Vec::new();
            for row in &rows {
                let attribution = explainer.shap_values(row)?;
                let (values, _) = attribution.first_channel();
                totals.resize(values.len(), 0.0);
                for (total, phi) in totals.iter_mut().zip(values) {
                    *total += phi.abs();
                }
            }
            Ok::<_, AttributionError>(totals)
        })
        .await??;

        let mut features: Vec<(String, f64)> = feature_names
            .iter()
            .cloned()
            .zip(totals.into_iter().map(|t| t / samples.max(1) as f64))
            .collect();
        features.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(GlobalImportance {
            most_important: features.first().map(|(name, _)| name.clone()),
            features,
            samples_analyzed: samples,
        })
    }

    /// Cached explainer for `handle`, built on first use.
    ///
    /// `fallback_background` is used only if the model carries no reference
    /// rows of its own.
    async fn explainer(
        &self,
        handle: &ModelHandle,
        fallback_background: Vec<Vec<f64>>,
    ) -> Result<Arc<Explainer>, ExplainFailure> {
        let strategy = self.strategy(handle);
        let model = Arc::clone(&handle.model);
        let kernel = self.kernel.clone();
        self.explainers
            .get_or_try_init(handle.id(), || async move {
                let built = tokio::task::spawn_blocking(move || {
                    let mut background = model.reference_rows(kernel.max_background);
                    if background.is_empty() {
                        background = fallback_background;
                    }
                    Explainer::build(strategy, model, background, &kernel)
                })
                .await??;
                tracing::debug!(model = %built.model_id(), %strategy, "explainer built");
                Ok::<_, ExplainFailure>(Arc::new(built))
            })
            .await
    }

    /// Whether an explainer is cached for `model`.
    pub fn has_explainer(&self, model: ModelId) -> bool {
        self.explainers.contains(&model)
    }

    /// Drop all cached explainers.
    pub fn clear(&self) {
        self.explainers.clear();
    }

    /// Drop the explainer of one model.
    pub fn evict(&self, model: ModelId) {
        if self.explainers.remove(&model).is_some() {
            tracing::debug!(model = %model, "explainer evicted");
        }
    }
}
