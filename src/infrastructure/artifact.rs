//! Artifact files on local disk.
//!
//! The codec is chosen by file extension: `.json` for JSON, `.bin` or
//! `.bincode` for bincode.

use crate::application::ports::{ArtifactError, ArtifactReader};
use crate::domain::model::ModelArtifact;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;

/// Serialization format of an artifact file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
    Bincode,
}

impl ArtifactFormat {
    pub fn from_path(path: &Path) -> Result<Self, ArtifactError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(ArtifactFormat::Json),
            Some("bin") | Some("bincode") => Ok(ArtifactFormat::Bincode),
            _ => Err(ArtifactError::UnsupportedFormat {
                path: path.display().to_string(),
            }),
        }
    }
}

pub fn decode(path: &Path, bytes: &[u8]) -> Result<ModelArtifact, ArtifactError> {
    let malformed = |reason: String| ArtifactError::Malformed {
        path: path.display().to_string(),
        reason,
    };
    let artifact: ModelArtifact = match ArtifactFormat::from_path(path)? {
        ArtifactFormat::Json => serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?,
        ArtifactFormat::Bincode => bincode::deserialize(bytes).map_err(|e| malformed(e.to_string()))?,
    };
    artifact.validate()?;
    Ok(artifact)
}

pub fn encode(path: &Path, artifact: &ModelArtifact) -> Result<Vec<u8>, ArtifactError> {
    let malformed = |reason: String| ArtifactError::Malformed {
        path: path.display().to_string(),
        reason,
    };
    match ArtifactFormat::from_path(path)? {
        ArtifactFormat::Json => serde_json::to_vec_pretty(artifact).map_err(|e| malformed(e.to_string())),
        ArtifactFormat::Bincode => bincode::serialize(artifact).map_err(|e| malformed(e.to_string())),
    }
}

/// Write `artifact` to `path`, creating parent directories.
pub async fn save(path: &Path, artifact: &ModelArtifact) -> Result<(), ArtifactError> {
    let bytes = encode(path, artifact)?;
    let unwritable = |e: std::io::Error| ArtifactError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(unwritable)?;
    }
    tokio::fs::write(path, bytes).await.map_err(unwritable)
}

/// Reads artifacts with `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsArtifactReader;

impl FsArtifactReader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ArtifactReader for FsArtifactReader {
    async fn read(&self, path: &Path) -> Result<Option<ModelArtifact>, ArtifactError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ArtifactError::Unreadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };
        decode(path, &bytes).map(Some)
    }
}
