//! Artifact path resolution and collection

use crate::files::{self, FileError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error(transparent)]
    Io(#[from] FileError),
}

/// Expand glob patterns relative to `base`
///
/// Patterns without glob characters are taken literally and kept only if the
/// path exists. Results keep pattern order, each pattern's matches sorted,
/// without duplicates.
pub fn resolve_patterns(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, ArtifactError> {
    let mut resolved: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let trimmed = pattern.trim_end_matches('/');
        let matches = if contains_glob_chars(trimmed) {
            let full = format!(
                "{}/{}",
                glob::Pattern::escape(&base.to_string_lossy()),
                trimmed
            );
            let mut entries: Vec<PathBuf> = glob::glob(&full)
                .map_err(|e| ArtifactError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?
                .filter_map(|entry| entry.ok())
                .collect();
            entries.sort();
            entries
        } else {
            let path = base.join(trimmed);
            if path.exists() {
                vec![path]
            } else {
                vec![]
            }
        };

        if matches.is_empty() {
            warn!("No files match pattern '{}'", pattern);
        }
        for path in matches {
            if !resolved.contains(&path) {
                resolved.push(path);
            }
        }
    }

    Ok(resolved)
}

/// Copy matched paths into `dest`, keeping their layout relative to `base`
///
/// Returns the copied top-level paths under `dest`.
pub async fn collect(
    base: &Path,
    matches: &[PathBuf],
    dest: &Path,
) -> Result<Vec<PathBuf>, ArtifactError> {
    let mut kept = Vec::with_capacity(matches.len());
    for source in matches {
        let relative = source.strip_prefix(base).unwrap_or(source.as_path());
        let target = dest.join(relative);
        let count = files::copy_recursive(source, &target).await?;
        debug!("Kept artifact {} ({} files)", relative.display(), count);
        kept.push(target);
    }
    Ok(kept)
}

fn contains_glob_chars(s: &str) -> bool {
    s.contains('*') || s.contains('?') || s.contains('[') || s.contains(']')
}
