//! Model registry client over HTTP.
//!
//! Expects a registry exposing:
//!
//! ```text
//! GET {base}/models/{name}/versions            -> [RegistryVersion]
//! GET {base}/models/{name}/versions/{version}  -> ModelArtifact (JSON)
//! ```
//!
//! `{version}` may be `latest`; resolving it is the server's job.

use crate::application::ports::{ModelRegistry, RegistryError, RegistryVersion};
use crate::domain::model::ModelArtifact;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpModelRegistry {
    client: Client,
    base_url: String,
}

impl HttpModelRegistry {
    /// Create a client for the registry at `base_url`.
    ///
    /// # Errors
    /// Returns `RegistryError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn versions_url(&self, name: &str) -> String {
        format!("{}/models/{}/versions", self.base_url, name)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, RegistryError> {
        tracing::debug!(url, "registry request");
        self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                RegistryError::Transport(format!("request to {url} timed out"))
            } else {
                RegistryError::Transport(e.to_string())
            }
        })
    }
}

#[async_trait]
impl ModelRegistry for HttpModelRegistry {
    async fn resolve(&self, name: &str, version: &str) -> Result<ModelArtifact, RegistryError> {
        let url = format!("{}/{}", self.versions_url(name), version);
        let response = self.get(&url).await?;
        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(RegistryError::NotFound {
                    name: name.to_string(),
                    version: version.to_string(),
                })
            }
            status if !status.is_success() => {
                return Err(RegistryError::Transport(format!(
                    "registry answered {status} for {url}"
                )))
            }
            _ => {}
        }

        let artifact: ModelArtifact = response
            .json()
            .await
            .map_err(|e| RegistryError::Malformed(e.to_string()))?;
        artifact
            .validate()
            .map_err(|e| RegistryError::Malformed(e.to_string()))?;
        Ok(artifact)
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<RegistryVersion>, RegistryError> {
        let url = self.versions_url(name);
        let response = self.get(&url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = response
            .error_for_status()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| RegistryError::Malformed(e.to_string()))
    }
}
