//! Filesystem access behind a capability trait
//!
//! Every file operation the identification pipeline performs (existence
//! checks, renames, deletes, reads) goes through [`FileSystem`] so tests can
//! substitute an in-memory implementation. [`OsFileSystem`] is the production
//! implementation over `tokio::fs`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::fs;
use tracing::info;

/// Filesystem operations used by the pipeline
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Check whether a path exists
    async fn exists(&self, path: &Path) -> bool;

    /// Size of a file in bytes
    async fn file_size(&self, path: &Path) -> Result<u64>;

    /// Read a whole file into memory
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Create a directory and any missing parents
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Delete a file
    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Rename a file within its parent directory, returning the new path
    async fn rename(&self, path: &Path, new_name: &str) -> Result<PathBuf>;
}

/// Production filesystem implementation
pub struct OsFileSystem;

#[async_trait]
impl FileSystem for OsFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn file_size(&self, path: &Path) -> Result<u64> {
        let metadata = fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat '{}'", path.display()))?;
        Ok(metadata.len())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
            .await
            .with_context(|| format!("Failed to read '{}'", path.display()))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory '{}'", path.display()))
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to delete '{}'", path.display()))
    }

    async fn rename(&self, path: &Path, new_name: &str) -> Result<PathBuf> {
        // Validate new name doesn't contain path separators
        if new_name.contains('/') || new_name.contains('\\') {
            return Err(anyhow!("New name cannot contain path separators"));
        }

        let parent = path.parent().ok_or_else(|| anyhow!("Cannot rename root"))?;
        let target_path = parent.join(new_name);

        // Check target doesn't exist
        if fs::try_exists(&target_path).await.unwrap_or(false) {
            return Err(anyhow!("A file with that name already exists"));
        }

        fs::rename(path, &target_path).await.with_context(|| {
            format!(
                "Failed to rename '{}' to '{}'",
                path.display(),
                target_path.display()
            )
        })?;

        info!(
            from = %path.display(),
            to = %target_path.display(),
            "Renamed file"
        );

        Ok(target_path)
    }
}
