//! # investwise-serving
//!
//! Prediction-serving core for the InvestWise economic indicator models:
//! per-caller sliding-window admission, model resolution with fallbacks,
//! and Shapley-style explanations of individual predictions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use investwise_serving::{GatewayBuilder, PredictionRequest, WindowPolicy};
//! use std::collections::BTreeMap;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = GatewayBuilder::new()
//!     .with_rate_limit(WindowPolicy::per_seconds(100, 60)?)
//!     .build()?;
//! gateway.warm_up().await;
//!
//! let features = BTreeMap::from([
//!     ("gdp_growth_rate".to_string(), 5.2),
//!     ("inflation_rate".to_string(), 6.8),
//!     ("usd_kes_rate".to_string(), 129.5),
//!     ("cbr_rate".to_string(), 10.5),
//!     ("trade_balance".to_string(), -1200.0),
//! ]);
//! let outcome = gateway
//!     .predict("203.0.113.7", PredictionRequest::new(features).with_explanation(true))
//!     .await?;
//! println!("{} ({})", outcome.prediction, outcome.provenance);
//! # Ok(())
//! # }
//! ```
//!
//! ## Request Lifecycle
//!
//! [`PredictionGateway::predict`] validates the feature map against the
//! [`FeatureSchema`], admits the caller against its window, resolves the
//! requested model version, runs inference under a timeout, and optionally
//! attaches an [`Explanation`]. Any stage before explanation can end the
//! request with a [`Rejection`], each carrying an HTTP status hint:
//!
//! | Rejection           | Status |
//! |---------------------|--------|
//! | `Validation`        | 422    |
//! | `RateLimited`       | 429    |
//! | `ModelUnavailable`  | 404    |
//! | `PredictionFailed`  | 503    |
//! | `PredictionTimeout` | 504    |
//!
//! Validation precedes admission, so malformed requests never consume quota.
//!
//! ## Admission
//!
//! Each caller owns a window in a shared [`WindowStore`]. One atomic batch
//! drops expired entries, counts the rest and inserts the new entry; a
//! request that would exceed the limit is retracted. When the store fails,
//! requests are admitted and a warning is logged, and a circuit breaker
//! stops calling a store that keeps failing.
//!
//! ```rust
//! use investwise_serving::WindowPolicy;
//!
//! let policy = WindowPolicy::per_seconds(3, 60).unwrap();
//! assert!(policy.decide(2));
//! assert!(!policy.decide(3));
//! ```
//!
//! ## Model Resolution
//!
//! Versions resolve through three tiers, tagged on the handle as
//! [`Provenance`]:
//!
//! 1. the model registry, under a timeout
//! 2. local artifact files (JSON or bincode), from path templates
//! 3. a synthetic stub fitted on seeded data, reported as degraded
//!
//! Resolved handles are cached per version; concurrent first requests for
//! the same version share a single load.
//!
//! ## Explanations
//!
//! The explainer is chosen from the model's structure: exact path-dependent
//! attribution for tree ensembles, closed-form attribution for linear
//! models, and sampled Kernel SHAP for everything else. Contributions always
//! sum with the base value to the model output. Explanation is best effort:
//! a failure is logged and the outcome carries no explanation.
//!
//! ## Feature Flags
//!
//! - `redis-storage`: share windows across instances through Redis
//! - `http-registry`: resolve artifacts from a remote registry over HTTP
//! - `test-helpers`: expose the mocks in [`infrastructure::mocks`]

/// Domain layer - pure serving logic.
pub mod domain;

/// Application layer - orchestration and ports.
pub mod application;

/// Infrastructure layer - adapters and wiring.
pub mod infrastructure;

pub use domain::{
    attribution::{Attribution, AttributionError, Explainer, KernelConfig},
    explanation::{ExplainerStrategy, Explanation, FeatureContribution, GlobalImportance},
    features::{FeatureError, FeatureSchema, FeatureSpec},
    model::{ModelArtifact, ModelHandle, Prediction, Provenance, StructureKind},
    outcome::{
        is_version_token, PredictionOutcome, PredictionRequest, Rejection, RejectionKind, LATEST,
    },
    window::{AdmissionDecision, PolicyError, RateStatus, WindowPolicy},
};

pub use application::{
    circuit_breaker::{CircuitBreakerConfig, CircuitState},
    gateway::{GatewayConfig, HealthReport, HealthStatus, PredictionGateway},
    metrics::{MetricsSnapshot, ServingMetrics},
    model_manager::{ModelInfo, ModelManagerConfig, ModelStatus},
    ports::{
        ArtifactReader, Clock, InferenceBackend, ModelRegistry, PredictionSink, WindowStore,
    },
};

pub use infrastructure::{
    builder::{BuildError, GatewayBuilder},
    clock::SystemClock,
    config::{ConfigError, ServingConfig},
    fs_registry::FsModelRegistry,
    memory_store::MemoryWindowStore,
    sink::TracingSink,
    telemetry::LogFormat,
};

#[cfg(feature = "http-registry")]
pub use infrastructure::http_registry::HttpModelRegistry;

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisWindowStore, RedisWindowStoreConfig};
