//! Keyed directory cache shared across pipeline runs
//!
//! Each key owns one slot directory under the cache root. A save builds the
//! new snapshot in a temporary sibling and swaps it in, so restores never see
//! a half-written slot. Concurrent saves to the same key race; the last swap
//! wins and the losers clean up after themselves.

use crate::files as fs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// File inside each slot holding the unsanitized key
const KEY_FILE: &str = ".stagehand-cache-key";

/// How often a save retries when concurrent saves keep replacing the slot
const SWAP_ATTEMPTS: usize = 16;

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No cache directory available on this platform")]
    NoCacheDir,
}

impl CacheError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<fs::FileError> for CacheError {
    fn from(err: fs::FileError) -> Self {
        CacheError::Io {
            path: err.path,
            source: err.source,
        }
    }
}

/// Outcome of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRestore {
    /// A snapshot existed; this many files were copied back
    Hit { files: usize },
    /// Nothing stored under the key
    Miss,
}

/// A stored cache slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub files: usize,
}

/// Restores and saves cache slots
#[derive(Debug, Clone)]
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    /// Create a manager rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a manager under the platform cache dir
    pub fn with_default_path() -> Result<Self, CacheError> {
        let base = dirs::cache_dir().ok_or(CacheError::NoCacheDir)?;
        Ok(Self::new(base.join("stagehand").join("cache")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the snapshot for `key`
    pub fn slot_dir(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }

    /// Copy the snapshot for `key` back into `project_dir`
    ///
    /// Files present in the snapshot overwrite files in the project; other
    /// project files are left alone.
    pub async fn restore(
        &self,
        key: &str,
        paths: &[String],
        project_dir: &Path,
    ) -> Result<CacheRestore, CacheError> {
        let slot = self.slot_dir(key);
        if !fs::exists(&slot).await {
            debug!("Cache miss for key '{}'", key);
            return Ok(CacheRestore::Miss);
        }

        let mut files = 0;
        for path in paths {
            let relative = normalize(path);
            let source = slot.join(&relative);
            if fs::exists(&source).await {
                files += fs::copy_recursive(&source, &project_dir.join(&relative)).await?;
            }
        }

        info!("Restored {} cached files for key '{}'", files, key);
        Ok(CacheRestore::Hit { files })
    }

    /// Snapshot `paths` of `project_dir` under `key`, replacing any previous slot
    ///
    /// Returns the number of files saved. Paths that do not exist are skipped.
    pub async fn save(
        &self,
        key: &str,
        paths: &[String],
        project_dir: &Path,
    ) -> Result<usize, CacheError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CacheError::io(&self.root, e))?;

        let slot_name = sanitize_key(key);
        let staging = self.root.join(format!(".{}.{}.tmp", slot_name, Uuid::new_v4()));

        let result = self.stage_and_swap(key, paths, project_dir, &staging).await;
        if result.is_err() && fs::exists(&staging).await {
            if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                warn!("Failed to remove cache staging dir {}: {}", staging.display(), e);
            }
        }

        let files = result?;
        info!("Saved {} files to cache key '{}'", files, key);
        Ok(files)
    }

    async fn stage_and_swap(
        &self,
        key: &str,
        paths: &[String],
        project_dir: &Path,
        staging: &Path,
    ) -> Result<usize, CacheError> {
        tokio::fs::create_dir_all(staging)
            .await
            .map_err(|e| CacheError::io(staging, e))?;

        let mut files = 0;
        for path in paths {
            let relative = normalize(path);
            let source = project_dir.join(&relative);
            if !fs::exists(&source).await {
                debug!("Cache path '{}' does not exist, skipping", path);
                continue;
            }
            files += fs::copy_recursive(&source, &staging.join(&relative)).await?;
        }

        let key_file = staging.join(KEY_FILE);
        tokio::fs::write(&key_file, key)
            .await
            .map_err(|e| CacheError::io(&key_file, e))?;

        self.swap_in(key, staging).await?;
        Ok(files)
    }

    /// Move `staging` into the slot for `key`
    ///
    /// The current slot is renamed aside before the swap. When another save
    /// puts its own slot in place between those two renames, the swap is
    /// retried, so the last save to reach the slot wins.
    async fn swap_in(&self, key: &str, staging: &Path) -> Result<(), CacheError> {
        let slot = self.slot_dir(key);
        let slot_name = sanitize_key(key);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let retired = self.root.join(format!(".{}.{}.old", slot_name, Uuid::new_v4()));
            let had_previous = match tokio::fs::rename(&slot, &retired).await {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(CacheError::io(&slot, e)),
            };

            let swapped = tokio::fs::rename(staging, &slot).await;

            if had_previous {
                if let Err(e) = tokio::fs::remove_dir_all(&retired).await {
                    warn!("Failed to remove old cache slot {}: {}", retired.display(), e);
                }
            }

            let err = match swapped {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if attempt >= SWAP_ATTEMPTS || !fs::exists(&slot).await {
                return Err(CacheError::io(&slot, err));
            }
            debug!(
                "Cache slot '{}' was replaced during save ({}), retrying",
                key, err
            );
        }
    }

    /// List stored slots
    pub async fn list(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();
        if !fs::exists(&self.root).await {
            return Ok(entries);
        }

        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::io(&self.root, e))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.root, e))?
        {
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !path.is_dir() {
                continue;
            }
            let key = tokio::fs::read_to_string(path.join(KEY_FILE))
                .await
                .unwrap_or_else(|_| entry.file_name().to_string_lossy().into_owned());
            let files = fs::count_files(&path).await?.saturating_sub(1);
            entries.push(CacheEntry { key, path, files });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Remove one slot, or every slot when `key` is `None`
    ///
    /// Returns the number of slots removed.
    pub async fn clear(&self, key: Option<&str>) -> Result<usize, CacheError> {
        match key {
            Some(key) => {
                let slot = self.slot_dir(key);
                if !fs::exists(&slot).await {
                    return Ok(0);
                }
                tokio::fs::remove_dir_all(&slot)
                    .await
                    .map_err(|e| CacheError::io(&slot, e))?;
                Ok(1)
            }
            None => {
                let count = self.list().await?.len();
                if fs::exists(&self.root).await {
                    tokio::fs::remove_dir_all(&self.root)
                        .await
                        .map_err(|e| CacheError::io(&self.root, e))?;
                }
                Ok(count)
            }
        }
    }
}

/// Turn a cache key into a safe directory name
pub fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() {
        "default".to_string()
    } else {
        sanitized.to_string()
    }
}

/// Strip trailing slashes and `./` so `.cache/` and `./.cache` land in one place
fn normalize(path: &str) -> PathBuf {
    Path::new(path.trim_end_matches('/'))
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}
