//! Filesystem access behind a seam
//!
//! Jobs go through this trait so the pipeline can run against a fake
//! filesystem in tests. The real implementation handles the cross-device
//! rename fallback.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Filesystem operations the pipeline needs
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
    async fn size(&self, path: &Path) -> Result<i64>;
    /// Move a file, creating parent directories at the destination
    async fn move_file(&self, from: &Path, to: &Path) -> Result<()>;
    async fn delete_file(&self, path: &Path) -> Result<()>;
}

/// Real filesystem backed by tokio::fs
#[derive(Debug, Default)]
pub struct TokioFileSystem;

#[async_trait]
impl FileSystem for TokioFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn size(&self, path: &Path) -> Result<i64> {
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        Ok(meta.len() as i64)
    }

    async fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        match tokio::fs::rename(from, to).await {
            Ok(()) => {}
            // Rename fails across filesystems; fall back to copy + remove
            Err(_) => {
                tokio::fs::copy(from, to).await.with_context(|| {
                    format!("Failed to copy {} to {}", from.display(), to.display())
                })?;
                tokio::fs::remove_file(from)
                    .await
                    .with_context(|| format!("Failed to remove {} after copy", from.display()))?;
            }
        }

        debug!(from = %from.display(), to = %to.display(), "File moved");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to delete {}", path.display()))?;
        debug!(path = %path.display(), "File deleted");
        Ok(())
    }
}
