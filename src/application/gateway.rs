//! Prediction gateway.
//!
//! Every request moves through the same stages:
//!
//! ```text
//! validate -> admit -> resolve model -> infer -> (explain) -> record
//! ```
//!
//! and any stage before `explain` may end it with a [`Rejection`].
//! Validation comes first so malformed requests never consume quota.
//! Explanation and recording are best effort and never change the outcome.

use crate::application::explainer::ExplainerManager;
use crate::application::limiter::SlidingWindowLimiter;
use crate::application::metrics::ServingMetrics;
use crate::application::model_manager::{ModelInfo, ModelManager};
use crate::application::ports::{InferenceBackend, PredictionSink};
use crate::domain::explanation::GlobalImportance;
use crate::domain::features::FeatureSchema;
use crate::domain::model::{ModelHandle, Prediction, Provenance};
use crate::domain::outcome::{PredictionOutcome, PredictionRequest, Rejection};
use crate::domain::window::{RateStatus, WindowPolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Request-path settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Per-caller admission quota.
    pub rate_limit: WindowPolicy,
    /// Upper bound on a single inference call.
    pub inference_timeout: Duration,
    /// Contributions kept in an explanation.
    pub explain_max_display: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit: WindowPolicy::default(),
            inference_timeout: Duration::from_secs(30),
            explain_max_display: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// A model from the registry or a local file is resident.
    Healthy,
    /// Serving from the synthetic stub.
    Degraded,
    /// No model is resident.
    NoModel,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub model_loaded: bool,
    pub current_version: Option<String>,
    pub provenance: Option<Provenance>,
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
}

/// Entry point for prediction requests.
#[derive(Debug)]
pub struct PredictionGateway {
    config: GatewayConfig,
    schema: FeatureSchema,
    limiter: SlidingWindowLimiter,
    models: Arc<ModelManager>,
    explainers: Arc<ExplainerManager>,
    inference: Arc<dyn InferenceBackend>,
    sink: Option<Arc<dyn PredictionSink>>,
    metrics: ServingMetrics,
}

impl PredictionGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GatewayConfig,
        schema: FeatureSchema,
        limiter: SlidingWindowLimiter,
        models: Arc<ModelManager>,
        explainers: Arc<ExplainerManager>,
        inference: Arc<dyn InferenceBackend>,
        sink: Option<Arc<dyn PredictionSink>>,
        metrics: ServingMetrics,
    ) -> Self {
        Self {
            config,
            schema,
            limiter,
            models,
            explainers,
            inference,
            sink,
            metrics,
        }
    }

    /// Serve one prediction for `caller`.
    ///
    /// # Errors
    /// The [`Rejection`] naming the stage that ended the request.
    pub async fn predict(
        &self,
        caller: &str,
        request: PredictionRequest,
    ) -> Result<PredictionOutcome, Rejection> {
        let started = Instant::now();
        match self.run(caller, request, started).await {
            Ok(outcome) => {
                self.metrics.record_prediction();
                tracing::info!(
                    caller,
                    version = %outcome.model_version,
                    provenance = %outcome.provenance,
                    prediction = outcome.prediction,
                    explained = outcome.explanation.is_some(),
                    elapsed_ms = outcome.processing_time.as_millis() as u64,
                    "prediction served"
                );
                self.record(outcome.clone());
                Ok(outcome)
            }
            Err(rejection) => {
                self.metrics.record_rejection(rejection.kind());
                let kind = rejection.kind();
                if kind.http_status() >= 500 {
                    tracing::error!(caller, %kind, error = %rejection, "prediction rejected");
                } else {
                    tracing::debug!(caller, %kind, error = %rejection, "prediction rejected");
                }
                Err(rejection)
            }
        }
    }

    async fn run(
        &self,
        caller: &str,
        request: PredictionRequest,
        started: Instant,
    ) -> Result<PredictionOutcome, Rejection> {
        let x = self.schema.vectorize(&request.features)?;

        let policy = self.config.rate_limit;
        if self.limiter.admit(caller, &policy).await.is_denied() {
            let status = self.limiter.status(caller, &policy).await;
            return Err(Rejection::RateLimited {
                limit: status.limit,
                remaining: status.remaining,
                window: status.window,
            });
        }

        let handle = self
            .models
            .get(&request.model_version)
            .await
            .map_err(|e| Rejection::ModelUnavailable { version: e.version })?;

        let prediction = self.infer(&handle, x.clone()).await?;

        let explanation = if request.explain {
            self.explainers
                .explain(
                    &handle,
                    &x,
                    &self.schema.names(),
                    self.config.explain_max_display,
                )
                .await
        } else {
            None
        };

        Ok(PredictionOutcome {
            caller: caller.to_string(),
            features: request.features,
            model_version: handle.version.clone(),
            provenance: handle.provenance,
            prediction: prediction.value,
            confidence: prediction.confidence,
            explanation,
            processing_time: started.elapsed(),
            timestamp: Utc::now(),
        })
    }

    /// Run the backend on the blocking pool under the inference timeout.
    ///
    /// A timed-out call keeps its blocking thread until it returns; its
    /// result is discarded.
    async fn infer(&self, handle: &ModelHandle, x: Vec<f64>) -> Result<Prediction, Rejection> {
        let timeout = self.config.inference_timeout;
        let backend = Arc::clone(&self.inference);
        let model = Arc::clone(&handle.model);
        let task = tokio::task::spawn_blocking(move || backend.infer(&model, &x));

        match tokio::time::timeout(timeout, task).await {
            Err(_) => Err(Rejection::PredictionTimeout { timeout }),
            Ok(Err(join)) => Err(Rejection::PredictionFailed {
                reason: join.to_string(),
            }),
            Ok(Ok(Err(e))) => Err(Rejection::PredictionFailed {
                reason: e.to_string(),
            }),
            Ok(Ok(Ok(prediction))) => Ok(prediction),
        }
    }

    /// Hand `outcome` to the sink without waiting for it.
    fn record(&self, outcome: PredictionOutcome) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        tokio::spawn(async move {
            let caller = outcome.caller.clone();
            if let Err(e) = sink.record(outcome).await {
                tracing::warn!(caller, error = %e, "failed to record prediction");
            }
        });
    }

    /// Quota usage for `identifier`. Never consumes quota.
    pub async fn rate_status(&self, identifier: &str) -> RateStatus {
        self.limiter.status(identifier, &self.config.rate_limit).await
    }

    /// Clear `identifier`'s window.
    pub async fn reset_rate_limit(&self, identifier: &str) -> bool {
        match self.limiter.reset(identifier).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(identifier, error = %e, "failed to reset rate limit");
                false
            }
        }
    }

    pub async fn list_models(&self) -> Vec<ModelInfo> {
        self.models.list().await
    }

    /// Re-resolve `version`, dropping the explainer of the model it replaces.
    pub async fn load_model(&self, version: &str) -> bool {
        let previous = self.models.cached(version);
        if !self.models.load(version).await {
            return false;
        }
        if let (Some(previous), Some(current)) = (previous, self.models.cached(version)) {
            if !previous.same_model(&current) {
                self.explainers.evict(previous.id());
            }
        }
        true
    }

    /// Drop `version` and its explainer.
    pub fn unload_model(&self, version: &str) -> bool {
        match self.models.unload(version) {
            Some(handle) => {
                self.explainers.evict(handle.id());
                true
            }
            None => false,
        }
    }

    /// Resolve `"latest"` so the first request does not pay for it.
    pub async fn warm_up(&self) -> bool {
        self.models.load_default().await
    }

    /// Feature ranking for `version` over `rows`.
    pub async fn global_importance(
        &self,
        version: &str,
        rows: &[Vec<f64>],
        n_samples: usize,
    ) -> Option<GlobalImportance> {
        let handle = match self.models.get(version).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(version, error = %e, "global importance unavailable");
                return None;
            }
        };
        self.explainers
            .global_importance(&handle, rows, &self.schema.names(), n_samples)
            .await
    }

    pub fn feature_schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn health(&self) -> HealthReport {
        let current = self.models.current();
        let provenance = current.as_ref().map(|h| h.provenance);
        let degraded = provenance.is_some_and(|p| p.is_degraded());
        let status = match (&current, degraded) {
            (None, _) => HealthStatus::NoModel,
            (Some(_), true) => HealthStatus::Degraded,
            (Some(_), false) => HealthStatus::Healthy,
        };
        HealthReport {
            status,
            model_loaded: current.is_some(),
            current_version: current.map(|h| h.version),
            provenance,
            degraded,
            timestamp: Utc::now(),
        }
    }

    pub fn metrics(&self) -> &ServingMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
