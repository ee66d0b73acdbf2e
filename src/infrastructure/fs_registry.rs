//! Versioned model registry on a local or mounted filesystem.
//!
//! ```text
//! <root>/<model name>/<version>/artifact.json
//! <root>/<model name>/<version>/artifact.bin
//! ```
//!
//! `"latest"` is the highest version directory, comparing digit runs
//! numerically so `v10` sorts after `v9`.

use crate::application::ports::{ArtifactReader, ModelRegistry, RegistryError, RegistryVersion};
use crate::domain::model::ModelArtifact;
use crate::domain::outcome::{is_version_token, LATEST};
use crate::infrastructure::artifact::FsArtifactReader;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const ARTIFACT_FILES: [&str; 2] = ["artifact.json", "artifact.bin"];

#[derive(Debug, Clone)]
pub struct FsModelRegistry {
    root: PathBuf,
    reader: FsArtifactReader,
}

impl FsModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            reader: FsArtifactReader::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Version directories under `name`, highest first.
    async fn versions(&self, name: &str) -> Result<Vec<String>, RegistryError> {
        let dir = self.root.join(name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RegistryError::Transport(e.to_string())),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if let (true, Some(version)) = (is_dir, entry.file_name().to_str()) {
                versions.push(version.to_string());
            }
        }
        versions.sort_by(|a, b| compare_versions(b, a));
        Ok(versions)
    }

    async fn read_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<(ModelArtifact, PathBuf)>, RegistryError> {
        let dir = self.root.join(name).join(version);
        for file in ARTIFACT_FILES {
            let path = dir.join(file);
            match self.reader.read(&path).await {
                Ok(Some(artifact)) => return Ok(Some((artifact, path))),
                Ok(None) => continue,
                Err(e) => return Err(RegistryError::Malformed(e.to_string())),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ModelRegistry for FsModelRegistry {
    async fn resolve(&self, name: &str, version: &str) -> Result<ModelArtifact, RegistryError> {
        let not_found = || RegistryError::NotFound {
            name: name.to_string(),
            version: version.to_string(),
        };
        if !is_version_token(version) {
            tracing::warn!(name, version, "refusing malformed version token");
            return Err(not_found());
        }
        let resolved = if version == LATEST {
            self.versions(name)
                .await?
                .into_iter()
                .next()
                .ok_or_else(not_found)?
        } else {
            version.to_string()
        };

        let (mut artifact, path) = self
            .read_version(name, &resolved)
            .await?
            .ok_or_else(not_found)?;
        tracing::debug!(name, version, resolved = %resolved, path = %path.display(), "registry artifact read");
        artifact.version = Some(resolved);
        Ok(artifact)
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<RegistryVersion>, RegistryError> {
        let mut listed = Vec::new();
        for version in self.versions(name).await? {
            match self.read_version(name, &version).await {
                Ok(Some((artifact, path))) => {
                    let updated_at = match artifact.trained_at {
                        Some(at) => Some(at),
                        None => modified_at(&path).await,
                    };
                    listed.push(RegistryVersion {
                        version,
                        updated_at,
                        metrics: artifact.metrics,
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(name, version = %version, error = %e, "skipping unreadable version"),
            }
        }
        Ok(listed)
    }
}

async fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Order version strings by their digit runs, then lexically.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let numbers = |s: &str| -> Vec<u64> {
        s.split(|c: char| !c.is_ascii_digit())
            .filter(|run| !run.is_empty())
            .map(|run| run.parse().unwrap_or(u64::MAX))
            .collect()
    };
    numbers(a).cmp(&numbers(b)).then_with(|| a.cmp(b))
}
