//! Model resolution with a per-version cache.
//!
//! A version token resolves through three tiers, each falling through to the
//! next on any failure:
//!
//! 1. the model registry, under a timeout
//! 2. local artifact files, tried in template order
//! 3. a synthetic stub fitted on seeded random data
//!
//! Resolved handles are cached per token with single-flight semantics, so
//! concurrent cold requests for one version perform a single load. Tokens
//! that fail [`is_version_token`] are refused before any tier runs.
//!
//! The stub is built once per manager and shared by every token it serves.
//! At most `max_stub_versions` tokens other than `"latest"` keep a cached
//! stub handle; further tokens are still answered but not remembered.

use crate::application::metrics::ServingMetrics;
use crate::application::ports::{ArtifactReader, ModelRegistry, RegistryError};
use crate::application::single_flight::SingleFlight;
use crate::domain::features::FeatureSchema;
use crate::domain::model::{
    ArtifactInvalid, LoadedModel, ModelArtifact, ModelHandle, Provenance, StructureKind,
};
use crate::domain::outcome::{is_version_token, LATEST};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

/// Placeholder replaced by the version token in local path templates.
pub const VERSION_PLACEHOLDER: &str = "{version}";

/// Local artifact locations tried when the registry cannot serve a version.
pub const DEFAULT_LOCAL_PATHS: [&str; 5] = [
    "models/{version}.json",
    "models/{version}.bin",
    "models/model.json",
    "models/investwise_model.json",
    "../models/model.json",
];

/// Every resolution tier failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no model could be resolved for version '{version}'")]
pub struct ModelUnavailable {
    pub version: String,
}

/// Resolution settings.
#[derive(Debug, Clone)]
pub struct ModelManagerConfig {
    /// Registry name of the served model
    pub model_name: String,
    pub registry_timeout: Duration,
    /// Templates containing `{version}`, tried in order
    pub local_paths: Vec<String>,
    /// Fall back to a synthetic stub when all other tiers fail
    pub allow_synthetic: bool,
    pub synthetic_rows: usize,
    pub synthetic_seed: u64,
    /// Cached stub handles allowed besides `"latest"`
    pub max_stub_versions: usize,
}

impl Default for ModelManagerConfig {
    fn default() -> Self {
        Self {
            model_name: "investwise_predictor".to_string(),
            registry_timeout: Duration::from_secs(5),
            local_paths: DEFAULT_LOCAL_PATHS.iter().map(|p| p.to_string()).collect(),
            allow_synthetic: true,
            synthetic_rows: 200,
            synthetic_seed: 42,
            max_stub_versions: 16,
        }
    }
}

/// Whether a listed version is resident in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Loaded,
    Available,
}

/// One row of [`ModelManager::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Version token the model is known by
    pub version: String,
    /// Concrete version behind the token, when it differs
    pub resolved_version: Option<String>,
    pub status: ModelStatus,
    pub provenance: Option<Provenance>,
    pub structure: Option<StructureKind>,
    pub metrics: BTreeMap<String, f64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub loaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ModelManager {
    config: ModelManagerConfig,
    schema: FeatureSchema,
    registry: Option<Arc<dyn ModelRegistry>>,
    reader: Arc<dyn ArtifactReader>,
    cache: SingleFlight<String, ModelHandle>,
    stub: OnceLock<Option<Arc<LoadedModel>>>,
    metrics: ServingMetrics,
}

impl ModelManager {
    pub fn new(
        config: ModelManagerConfig,
        schema: FeatureSchema,
        registry: Option<Arc<dyn ModelRegistry>>,
        reader: Arc<dyn ArtifactReader>,
        metrics: ServingMetrics,
    ) -> Self {
        Self {
            config,
            schema,
            registry,
            reader,
            cache: SingleFlight::new(),
            stub: OnceLock::new(),
            metrics,
        }
    }

    pub fn config(&self) -> &ModelManagerConfig {
        &self.config
    }

    /// The cached handle for `version`, resolving it on first use.
    pub async fn get(&self, version: &str) -> Result<ModelHandle, ModelUnavailable> {
        Self::check_token(version)?;
        let handle = self
            .cache
            .get_or_try_init(version.to_string(), || self.resolve(version))
            .await?;
        if handle.provenance.is_degraded() {
            self.trim_stub_entries(version);
        }
        Ok(handle)
    }

    /// The cached handle for `version` without resolving.
    pub fn cached(&self, version: &str) -> Option<ModelHandle> {
        self.cache.get(&version.to_string())
    }

    /// Re-resolve `version` even if cached, replacing the cache entry.
    ///
    /// # Returns
    /// `true` if a model was resolved. On failure the previous entry stays.
    pub async fn load(&self, version: &str) -> bool {
        if let Err(e) = Self::check_token(version) {
            tracing::error!(version, error = %e, "model reload failed");
            return false;
        }
        match self.resolve(version).await {
            Ok(handle) => {
                let id = handle.id();
                let previous = self.cache.replace(version.to_string(), handle);
                tracing::info!(
                    version,
                    model = %id,
                    replaced = previous.is_some(),
                    "model reloaded"
                );
                true
            }
            Err(e) => {
                tracing::error!(version, error = %e, "model reload failed");
                false
            }
        }
    }

    /// Drop the cached handle for `version`.
    pub fn unload(&self, version: &str) -> Option<ModelHandle> {
        let removed = self.cache.remove(&version.to_string());
        if let Some(handle) = &removed {
            tracing::info!(version, model = %handle.id(), "model unloaded");
        }
        removed
    }

    /// Warm the cache with the newest model at startup.
    pub async fn load_default(&self) -> bool {
        match self.get(LATEST).await {
            Ok(handle) => {
                tracing::info!(
                    version = %handle.version,
                    provenance = %handle.provenance,
                    "default model loaded"
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "no default model available");
                false
            }
        }
    }

    pub fn is_model_loaded(&self) -> bool {
        !self.cache.is_empty()
    }

    /// The handle serving `"latest"`, or any resident handle.
    pub fn current(&self) -> Option<ModelHandle> {
        self.cached(LATEST).or_else(|| {
            let mut entries = self.cache.entries();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries.into_iter().map(|(_, handle)| handle).next()
        })
    }

    /// Resident handles plus versions the registry advertises that are not
    /// yet loaded.
    pub async fn list(&self) -> Vec<ModelInfo> {
        let mut cached = self.cache.entries();
        cached.sort_by(|a, b| a.0.cmp(&b.0));

        let mut known: BTreeSet<String> = BTreeSet::new();
        let mut infos: Vec<ModelInfo> = cached
            .into_iter()
            .map(|(token, handle)| {
                known.insert(token.clone());
                known.insert(handle.version.clone());
                let artifact = handle.model.artifact();
                ModelInfo {
                    resolved_version: (handle.version != token).then(|| handle.version.clone()),
                    version: token,
                    status: ModelStatus::Loaded,
                    provenance: Some(handle.provenance),
                    structure: Some(handle.structure),
                    metrics: artifact.metrics.clone(),
                    updated_at: artifact.trained_at,
                    loaded_at: Some(handle.loaded_at),
                }
            })
            .collect();

        let Some(registry) = &self.registry else {
            return infos;
        };
        let listing = tokio::time::timeout(
            self.config.registry_timeout,
            registry.list_versions(&self.config.model_name),
        )
        .await
        .unwrap_or(Err(RegistryError::Timeout(self.config.registry_timeout)));

        match listing {
            Ok(versions) => {
                for advertised in versions {
                    if known.contains(&advertised.version) {
                        continue;
                    }
                    infos.push(ModelInfo {
                        version: advertised.version,
                        resolved_version: None,
                        status: ModelStatus::Available,
                        provenance: None,
                        structure: None,
                        metrics: advertised.metrics,
                        updated_at: advertised.updated_at,
                        loaded_at: None,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "registry listing failed, reporting loaded models only");
            }
        }
        infos
    }

    fn check_token(version: &str) -> Result<(), ModelUnavailable> {
        if is_version_token(version) {
            return Ok(());
        }
        tracing::warn!(version, "refusing malformed version token");
        Err(ModelUnavailable {
            version: version.to_string(),
        })
    }

    /// Forget the stub handle for `version` once too many tokens hold one.
    fn trim_stub_entries(&self, version: &str) {
        if version == LATEST {
            return;
        }
        let stubs = self
            .cache
            .entries()
            .into_iter()
            .filter(|(token, handle)| token != LATEST && handle.provenance.is_degraded())
            .count();
        if stubs > self.config.max_stub_versions {
            self.cache.remove(&version.to_string());
            tracing::debug!(version, stubs, "stub handle not cached");
        }
    }

    /// Run the fallback chain for `version`.
    async fn resolve(&self, version: &str) -> Result<ModelHandle, ModelUnavailable> {
        let handle = if let Some(handle) = self.from_registry(version).await {
            handle
        } else if let Some(handle) = self.from_local_files(version).await {
            handle
        } else if let Some(handle) = self.synthetic(version) {
            handle
        } else {
            tracing::error!(version, "all model resolution tiers failed");
            return Err(ModelUnavailable {
                version: version.to_string(),
            });
        };

        self.metrics.record_resolution(handle.provenance);
        tracing::info!(
            version,
            resolved = %handle.version,
            provenance = %handle.provenance,
            model = %handle.id(),
            "model resolved"
        );
        Ok(handle)
    }

    async fn from_registry(&self, version: &str) -> Option<ModelHandle> {
        let registry = self.registry.as_ref()?;
        let timeout = self.config.registry_timeout;
        let resolved = tokio::time::timeout(
            timeout,
            registry.resolve(&self.config.model_name, version),
        )
        .await
        .unwrap_or(Err(RegistryError::Timeout(timeout)));

        let artifact = match resolved {
            Ok(artifact) => artifact,
            Err(e @ RegistryError::NotFound { .. }) => {
                tracing::info!(version, error = %e, "registry has no such version, trying local files");
                return None;
            }
            Err(e) => {
                tracing::warn!(version, error = %e, "registry resolution failed, trying local files");
                return None;
            }
        };

        match self.accept(artifact) {
            Ok(model) => {
                let resolved = model
                    .artifact()
                    .version
                    .clone()
                    .unwrap_or_else(|| version.to_string());
                Some(ModelHandle::new(resolved, model, Provenance::Registry))
            }
            Err(e) => {
                tracing::warn!(version, error = %e, "registry artifact rejected, trying local files");
                None
            }
        }
    }

    async fn from_local_files(&self, version: &str) -> Option<ModelHandle> {
        for template in &self.config.local_paths {
            let path = PathBuf::from(template.replace(VERSION_PLACEHOLDER, version));
            let artifact = match self.reader.read(&path).await {
                Ok(Some(artifact)) => artifact,
                Ok(None) => {
                    tracing::debug!(path = %path.display(), "no artifact at path");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "unreadable artifact, trying next path");
                    continue;
                }
            };
            match self.accept(artifact) {
                Ok(model) => {
                    tracing::debug!(path = %path.display(), "artifact loaded from local file");
                    let resolved = model
                        .artifact()
                        .version
                        .clone()
                        .unwrap_or_else(|| version.to_string());
                    return Some(ModelHandle::new(resolved, model, Provenance::LocalFile));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid artifact, trying next path");
                }
            }
        }
        None
    }

    fn synthetic(&self, version: &str) -> Option<ModelHandle> {
        if !self.config.allow_synthetic {
            return None;
        }
        let model = self.stub.get_or_init(|| self.build_stub()).clone()?;
        tracing::warn!(version, model = %model.id(), "serving synthetic stub model, predictions are degraded");
        Some(ModelHandle::shared(version, model, Provenance::SyntheticStub))
    }

    fn build_stub(&self) -> Option<Arc<LoadedModel>> {
        let artifact = ModelArtifact::synthetic(
            &self.config.model_name,
            self.schema.names(),
            self.config.synthetic_rows,
            self.config.synthetic_seed,
        )?;
        match LoadedModel::new(artifact) {
            Ok(model) => Some(Arc::new(model)),
            Err(e) => {
                tracing::error!(error = %e, "synthetic stub could not be built");
                None
            }
        }
    }

    /// Validate an artifact and check it against the feature schema.
    fn accept(&self, artifact: ModelArtifact) -> Result<LoadedModel, ArtifactInvalid> {
        if artifact.n_features() != self.schema.len() {
            return Err(ArtifactInvalid::FeatureCount {
                expected: self.schema.len(),
                actual: artifact.n_features(),
            });
        }
        // Requests are vectorized in schema order, so names must line up.
        let expected = self.schema.names();
        let mismatch = expected
            .iter()
            .zip(&artifact.feature_names)
            .position(|(e, a)| e != a);
        if let Some(position) = mismatch {
            return Err(ArtifactInvalid::FeatureOrder {
                position,
                expected: expected[position].clone(),
                actual: artifact.feature_names[position].clone(),
            });
        }
        LoadedModel::new(artifact)
    }
}
