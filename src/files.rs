//! Async filesystem helpers shared by the cache, artifact and publish code

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// An I/O failure tied to the path it happened on
#[derive(Debug, Error)]
#[error("{}: {source}", path.display())]
pub struct FileError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

fn at(path: &Path) -> impl FnOnce(io::Error) -> FileError + '_ {
    move |source| FileError {
        path: path.to_path_buf(),
        source,
    }
}

pub async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Copy a file or directory tree to `dst`, overwriting existing files
///
/// Returns the number of files copied.
pub async fn copy_recursive(src: &Path, dst: &Path) -> Result<usize, FileError> {
    let metadata = tokio::fs::metadata(src).await.map_err(at(src))?;

    if !metadata.is_dir() {
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(at(parent))?;
        }
        tokio::fs::copy(src, dst).await.map_err(at(src))?;
        return Ok(1);
    }

    tokio::fs::create_dir_all(dst).await.map_err(at(dst))?;
    let mut count = 0;
    let mut entries = tokio::fs::read_dir(src).await.map_err(at(src))?;
    while let Some(entry) = entries.next_entry().await.map_err(at(src))? {
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        count += Box::pin(copy_recursive(&src_path, &dst_path)).await?;
    }
    Ok(count)
}

/// Count regular files under `path` (1 for a plain file)
pub async fn count_files(path: &Path) -> Result<usize, FileError> {
    let metadata = tokio::fs::metadata(path).await.map_err(at(path))?;
    if !metadata.is_dir() {
        return Ok(1);
    }

    let mut count = 0;
    let mut entries = tokio::fs::read_dir(path).await.map_err(at(path))?;
    while let Some(entry) = entries.next_entry().await.map_err(at(path))? {
        count += Box::pin(count_files(&entry.path())).await?;
    }
    Ok(count)
}
