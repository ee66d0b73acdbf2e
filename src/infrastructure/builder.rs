//! Fluent construction of a [`PredictionGateway`].
//!
//! Every port has an in-process default, so the smallest working gateway is
//! `GatewayBuilder::new().build()`: in-memory windows, local artifact files
//! with the synthetic fallback, in-process inference and no sink.

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::application::explainer::ExplainerManager;
use crate::application::gateway::{GatewayConfig, PredictionGateway};
use crate::application::limiter::SlidingWindowLimiter;
use crate::application::metrics::ServingMetrics;
use crate::application::model_manager::{ModelManager, ModelManagerConfig};
use crate::application::ports::{
    ArtifactReader, Clock, InferenceBackend, ModelRegistry, PredictionSink, RegistryError,
    WindowStore,
};
use crate::domain::attribution::KernelConfig;
use crate::domain::features::FeatureSchema;
use crate::domain::window::WindowPolicy;
use crate::infrastructure::artifact::FsArtifactReader;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::config::{ConfigError, ServingConfig};
use crate::infrastructure::fs_registry::FsModelRegistry;
use crate::infrastructure::inference::LocalInference;
use crate::infrastructure::memory_store::MemoryWindowStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error returned when building a gateway fails.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("inference timeout must be greater than 0")]
    ZeroInferenceTimeout,
    #[error("explanations must display at least one contribution")]
    ZeroExplainDisplay,
    #[error("feature schema must name at least one feature")]
    EmptySchema,
    #[error("kernel explainer needs at least one coalition and one background row")]
    InvalidKernel,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("registry setup failed: {0}")]
    Registry(#[from] RegistryError),
    #[cfg(feature = "redis-storage")]
    #[error("redis connection failed: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Builder for constructing a `PredictionGateway`.
#[derive(Debug, Default)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    schema: FeatureSchema,
    models: ModelManagerConfig,
    kernel: KernelConfig,
    circuit_breaker: CircuitBreakerConfig,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn WindowStore>>,
    registry: Option<Arc<dyn ModelRegistry>>,
    reader: Option<Arc<dyn ArtifactReader>>,
    inference: Option<Arc<dyn InferenceBackend>>,
    sink: Option<Arc<dyn PredictionSink>>,
    metrics: Option<ServingMetrics>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply settings read from the environment.
    ///
    /// Wires a filesystem registry for `MODEL_REGISTRY_DIR`, and an HTTP
    /// registry for `MODEL_REGISTRY_URL` when the `http-registry` feature is
    /// enabled. The Redis store needs a connection; see `with_redis`.
    pub fn from_config(config: &ServingConfig) -> Result<Self, BuildError> {
        let mut builder = Self::new()
            .with_gateway_config(config.gateway_config()?)
            .with_model_config(config.model_manager_config());

        if let Some(dir) = &config.model_registry_dir {
            builder = builder.with_registry(Arc::new(FsModelRegistry::new(dir)));
        }
        if let Some(url) = &config.model_registry_url {
            builder = builder.with_http_registry(url, config)?;
        }
        Ok(builder)
    }

    #[cfg(feature = "http-registry")]
    fn with_http_registry(self, url: &str, config: &ServingConfig) -> Result<Self, BuildError> {
        let registry = crate::infrastructure::http_registry::HttpModelRegistry::new(
            url,
            Duration::from_millis(config.registry_timeout_ms),
        )?;
        Ok(self.with_registry(Arc::new(registry)))
    }

    #[cfg(not(feature = "http-registry"))]
    fn with_http_registry(self, url: &str, _config: &ServingConfig) -> Result<Self, BuildError> {
        tracing::warn!(url, "MODEL_REGISTRY_URL ignored, built without the http-registry feature");
        Ok(self)
    }

    /// Share admission windows through Redis at `url`.
    #[cfg(feature = "redis-storage")]
    pub async fn with_redis(self, url: &str) -> Result<Self, BuildError> {
        let store = crate::infrastructure::redis_store::RedisWindowStore::connect(url).await?;
        Ok(self.with_store(Arc::new(store)))
    }

    pub fn with_gateway_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_rate_limit(mut self, policy: WindowPolicy) -> Self {
        self.config.rate_limit = policy;
        self
    }

    /// Set the upper bound on one inference call.
    ///
    /// The value will be validated when `build()` is called.
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.config.inference_timeout = timeout;
        self
    }

    pub fn with_explain_max_display(mut self, max_display: usize) -> Self {
        self.config.explain_max_display = max_display;
        self
    }

    pub fn with_schema(mut self, schema: FeatureSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_model_config(mut self, config: ModelManagerConfig) -> Self {
        self.models = config;
        self
    }

    pub fn with_kernel_config(mut self, config: KernelConfig) -> Self {
        self.kernel = config;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_artifact_reader(mut self, reader: Arc<dyn ArtifactReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn with_inference(mut self, inference: Arc<dyn InferenceBackend>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn PredictionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Share counters with an existing metrics handle.
    pub fn with_metrics(mut self, metrics: ServingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    /// Returns `BuildError` if the configuration is invalid.
    pub fn build(self) -> Result<PredictionGateway, BuildError> {
        if self.config.inference_timeout.is_zero() {
            return Err(BuildError::ZeroInferenceTimeout);
        }
        if self.config.explain_max_display == 0 {
            return Err(BuildError::ZeroExplainDisplay);
        }
        if self.schema.is_empty() {
            return Err(BuildError::EmptySchema);
        }
        if self.kernel.max_coalitions == 0 || self.kernel.max_background == 0 {
            return Err(BuildError::InvalidKernel);
        }

        let metrics = self.metrics.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryWindowStore::new()) as Arc<dyn WindowStore>);
        let reader = self
            .reader
            .unwrap_or_else(|| Arc::new(FsArtifactReader::new()) as Arc<dyn ArtifactReader>);
        let inference = self
            .inference
            .unwrap_or_else(|| Arc::new(LocalInference::new()) as Arc<dyn InferenceBackend>);

        let circuit_breaker = Arc::new(CircuitBreaker::new(
            self.circuit_breaker,
            Arc::clone(&clock),
        ));
        let limiter = SlidingWindowLimiter::new(store, clock, metrics.clone(), circuit_breaker);
        let models = ModelManager::new(
            self.models,
            self.schema.clone(),
            self.registry,
            reader,
            metrics.clone(),
        );
        let explainers = ExplainerManager::new(self.kernel, metrics.clone());

        Ok(PredictionGateway::new(
            self.config,
            self.schema,
            limiter,
            Arc::new(models),
            Arc::new(explainers),
            inference,
            self.sink,
            metrics,
        ))
    }
}
