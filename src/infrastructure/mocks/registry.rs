//! In-memory model registry with call counting and fault injection.

use crate::application::ports::{ModelRegistry, RegistryError, RegistryVersion};
use crate::domain::model::ModelArtifact;
use crate::domain::outcome::LATEST;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Registry double holding artifacts by version.
///
/// `"latest"` resolves to the greatest version key.
#[derive(Debug, Default)]
pub struct MockRegistry {
    artifacts: Mutex<BTreeMap<String, ModelArtifact>>,
    resolve_calls: AtomicUsize,
    list_calls: AtomicUsize,
    delay: Option<Duration>,
    failure: Option<RegistryError>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(self, version: impl Into<String>, artifact: ModelArtifact) -> Self {
        self.insert(version, artifact);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer every call with `error`.
    pub fn failing_with(mut self, error: RegistryError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn insert(&self, version: impl Into<String>, artifact: ModelArtifact) {
        self.artifacts
            .lock()
            .expect("MockRegistry mutex poisoned")
            .insert(version.into(), artifact);
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ModelRegistry for MockRegistry {
    async fn resolve(&self, name: &str, version: &str) -> Result<ModelArtifact, RegistryError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let artifacts = self.artifacts.lock().expect("MockRegistry mutex poisoned");
        let found = if version == LATEST {
            artifacts.iter().next_back()
        } else {
            artifacts.get_key_value(version)
        };
        found
            .map(|(key, artifact)| {
                let mut artifact = artifact.clone();
                artifact.version = Some(key.clone());
                artifact
            })
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    async fn list_versions(&self, _name: &str) -> Result<Vec<RegistryVersion>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        Ok(self
            .artifacts
            .lock()
            .expect("MockRegistry mutex poisoned")
            .iter()
            .map(|(version, artifact)| RegistryVersion {
                version: version.clone(),
                updated_at: artifact.trained_at,
                metrics: artifact.metrics.clone(),
            })
            .collect())
    }
}
