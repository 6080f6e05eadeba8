//! Artifact publishing to named endpoints

pub mod directory;

use crate::core::config::{EndpointConfig, EndpointKind};
use crate::files::FileError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub use directory::DirectoryTarget;

/// Error types for publish operations
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Artifact '{artifact}' already exists on {endpoint}")]
    AlreadyExists { endpoint: String, artifact: String },

    #[error("No files to publish")]
    NothingToPublish,

    #[error("Not a publishable file: {}", .0.display())]
    InvalidArtifact(PathBuf),

    #[error("Upload failed: {0}")]
    Io(#[from] FileError),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// A destination artifacts can be uploaded to
#[async_trait]
pub trait PublishTarget: Send + Sync {
    /// Endpoint name, for messages
    fn name(&self) -> &str;

    /// Check whether an artifact with this name is already present
    async fn exists(&self, artifact: &str) -> Result<bool, PublishError>;

    /// Upload `source` under `artifact`
    ///
    /// Must return [`PublishError::AlreadyExists`] rather than overwrite.
    async fn upload(&self, source: &Path, artifact: &str) -> Result<(), PublishError>;
}

/// What a publish run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    pub endpoint: String,
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
}

impl PublishReport {
    pub fn total(&self) -> usize {
        self.uploaded.len() + self.skipped.len()
    }
}

/// Uploads files to one target under a skip-existing policy
pub struct ArtifactPublisher {
    target: Arc<dyn PublishTarget>,
    skip_existing: bool,
}

impl ArtifactPublisher {
    pub fn new(target: Arc<dyn PublishTarget>, skip_existing: bool) -> Self {
        Self {
            target,
            skip_existing,
        }
    }

    /// Publish each file under its file name
    ///
    /// With `skip_existing`, artifacts already on the target are reported as
    /// skipped. Otherwise the first conflict fails the publish.
    pub async fn publish(&self, files: &[PathBuf]) -> Result<PublishReport, PublishError> {
        if files.is_empty() {
            return Err(PublishError::NothingToPublish);
        }

        let mut report = PublishReport {
            endpoint: self.target.name().to_string(),
            ..Default::default()
        };

        for file in files {
            let artifact = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| PublishError::InvalidArtifact(file.clone()))?
                .to_string();

            if self.skip_existing && self.target.exists(&artifact).await? {
                warn!("{} already exists on {}, skipping", artifact, self.target.name());
                report.skipped.push(artifact);
                continue;
            }

            match self.target.upload(file, &artifact).await {
                Ok(()) => {
                    info!("Uploaded {} to {}", artifact, self.target.name());
                    report.uploaded.push(artifact);
                }
                // Someone else uploaded it between the check and the upload
                Err(PublishError::AlreadyExists { .. }) if self.skip_existing => {
                    warn!("{} already exists on {}, skipping", artifact, self.target.name());
                    report.skipped.push(artifact);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }
}

/// Build the target for an endpoint declaration
pub fn target_for(name: &str, endpoint: &EndpointConfig) -> Arc<dyn PublishTarget> {
    match endpoint.kind {
        EndpointKind::Directory => Arc::new(DirectoryTarget::new(name, &endpoint.path)),
    }
}
