//! Filesystem publish target - a directory acting as a package index or site root

use crate::files::{self, FileError};
use crate::publish::{PublishError, PublishTarget};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Publishes artifacts as files (or trees) directly under `root`
#[derive(Debug, Clone)]
pub struct DirectoryTarget {
    name: String,
    root: PathBuf,
}

impl DirectoryTarget {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move a finished upload to its final name without replacing anything
    ///
    /// Files are hard-linked, which fails when the name is taken. Directory
    /// renames fail on a non-empty destination.
    async fn place(&self, partial: &Path, dest: &Path, artifact: &str) -> Result<(), PublishError> {
        let placed = if partial.is_dir() {
            tokio::fs::rename(partial, dest).await
        } else {
            tokio::fs::hard_link(partial, dest).await
        };

        let source = match placed {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if source.kind() == std::io::ErrorKind::AlreadyExists || files::exists(dest).await {
            debug!("{} appeared on {} during upload: {}", artifact, self.name, source);
            return Err(PublishError::AlreadyExists {
                endpoint: self.name.clone(),
                artifact: artifact.to_string(),
            });
        }
        Err(FileError {
            path: dest.to_path_buf(),
            source,
        }
        .into())
    }
}

#[async_trait]
impl PublishTarget for DirectoryTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, artifact: &str) -> Result<bool, PublishError> {
        Ok(files::exists(&self.root.join(artifact)).await)
    }

    async fn upload(&self, source: &Path, artifact: &str) -> Result<(), PublishError> {
        let dest = self.root.join(artifact);
        if files::exists(&dest).await {
            return Err(PublishError::AlreadyExists {
                endpoint: self.name.clone(),
                artifact: artifact.to_string(),
            });
        }

        // Copy under a hidden name first so readers never see a partial upload
        let partial = self.root.join(format!(".{}.{}.part", artifact, Uuid::new_v4()));
        let result = match files::copy_recursive(source, &partial).await {
            Ok(_) => self.place(&partial, &dest, artifact).await,
            Err(e) => Err(e.into()),
        };
        if files::exists(&partial).await {
            let removed = if partial.is_dir() {
                tokio::fs::remove_dir_all(&partial).await
            } else {
                tokio::fs::remove_file(&partial).await
            };
            if let Err(e) = removed {
                warn!("Failed to remove partial upload {}: {}", partial.display(), e);
            }
        }
        result?;

        debug!("Wrote {} to {}", artifact, self.root.display());
        Ok(())
    }
}
