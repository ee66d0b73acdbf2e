//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::model::{ArtifactInvalid, LoadedModel, ModelArtifact, ModelError, Prediction};
use crate::domain::outcome::PredictionOutcome;
use crate::domain::window::{WindowEntry, WindowTimestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Port for obtaining current time.
///
/// Window entries are shared between processes, so the clock reports
/// wall-clock time. Infrastructure provides `SystemClock` and `MockClock`.
pub trait Clock: Send + Sync + Debug {
    /// Get the current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// Failure talking to the shared window store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("window store unavailable: {0}")]
    Unavailable(String),
    #[error("window store command failed: {0}")]
    Command(String),
}

/// Port for the shared sliding-window store.
///
/// Each caller owns one window keyed by identifier. Implementations must run
/// [`WindowStore::admit_batch`] atomically with respect to other callers of
/// the same key, including callers in other processes when the store is
/// shared.
#[async_trait]
pub trait WindowStore: Send + Sync + Debug {
    /// In one atomic batch: remove entries at or before `cutoff`, count the
    /// remaining entries, insert `entry`, and set the window's expiry to
    /// `ttl`.
    ///
    /// # Returns
    /// The number of entries in the window before `entry` was inserted.
    async fn admit_batch(
        &self,
        key: &str,
        entry: &WindowEntry,
        cutoff: WindowTimestamp,
        ttl: Duration,
    ) -> Result<u64, StoreError>;

    /// Remove a single entry previously inserted by `admit_batch`.
    async fn retract(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Count entries newer than `cutoff` without modifying the window.
    async fn count(&self, key: &str, cutoff: WindowTimestamp) -> Result<u64, StoreError>;

    /// Drop the whole window.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Failure resolving an artifact from the model registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("model {name} version {version} not found in registry")]
    NotFound { name: String, version: String },
    #[error("registry did not answer within {0:?}")]
    Timeout(Duration),
    #[error("registry transport error: {0}")]
    Transport(String),
    #[error("registry returned a malformed artifact: {0}")]
    Malformed(String),
}

/// A version advertised by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryVersion {
    pub version: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Port for the versioned artifact store.
#[async_trait]
pub trait ModelRegistry: Send + Sync + Debug {
    /// Fetch and decode the artifact for `name` at `version`.
    ///
    /// `version` may be `"latest"`.
    async fn resolve(&self, name: &str, version: &str) -> Result<ModelArtifact, RegistryError>;

    /// Versions the registry can serve for `name`.
    async fn list_versions(&self, name: &str) -> Result<Vec<RegistryVersion>, RegistryError>;
}

/// Failure reading a model artifact file.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArtifactError {
    #[error("cannot read artifact {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("cannot decode artifact {path}: {reason}")]
    Malformed { path: String, reason: String },
    #[error("unsupported artifact format for {path}")]
    UnsupportedFormat { path: String },
    #[error(transparent)]
    Invalid(#[from] ArtifactInvalid),
}

/// Port for reading artifacts from local storage.
#[async_trait]
pub trait ArtifactReader: Send + Sync + Debug {
    /// Read and decode the artifact at `path`.
    ///
    /// # Returns
    /// `Ok(None)` when nothing exists at `path`.
    async fn read(&self, path: &Path) -> Result<Option<ModelArtifact>, ArtifactError>;
}

/// Failure persisting a completed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("prediction sink unavailable: {0}")]
    Unavailable(String),
    #[error("prediction sink rejected outcome: {0}")]
    Rejected(String),
}

/// Port for durable storage of completed predictions.
///
/// Called off the request path; failures are logged and otherwise ignored.
#[async_trait]
pub trait PredictionSink: Send + Sync + Debug {
    async fn record(&self, outcome: PredictionOutcome) -> Result<(), SinkError>;
}

/// Port for invoking a loaded model.
///
/// Runs on the blocking pool under the gateway's inference timeout.
pub trait InferenceBackend: Send + Sync + Debug {
    fn infer(&self, model: &LoadedModel, features: &[f64]) -> Result<Prediction, ModelError>;
}
