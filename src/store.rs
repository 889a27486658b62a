//! Local storage - atomic writes of fetched content.
//!
//! [`FsStore`] streams content into a hidden temporary file next to the final
//! path and only renames it into place once every byte has been written and
//! synced. An interrupted or failed transfer therefore never leaves a file
//! under the final name, and an existing file is replaced atomically.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::TransferError;
use crate::remote::ByteStream;
use crate::utils::partial_path;

/// Destination for downloaded content
#[async_trait::async_trait]
pub trait LocalStore: Send + Sync {
    /// Stream `content` to `file_name`, replacing any existing file atomically
    ///
    /// Returns the final path.
    async fn write_atomic(
        &self,
        file_name: &str,
        content: ByteStream,
    ) -> Result<PathBuf, TransferError>;
}

/// Filesystem-backed [`LocalStore`] rooted at one directory
#[derive(Clone, Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Store files under `root` (created on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Removes a temp file on drop unless disarmed
///
/// Covers both error returns and a worker abandoning the write future after
/// cancellation.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Failed to remove partial download"
                    );
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl LocalStore for FsStore {
    async fn write_atomic(
        &self,
        file_name: &str,
        mut content: ByteStream,
    ) -> Result<PathBuf, TransferError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            TransferError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create download directory '{}': {}",
                    self.root.display(),
                    e
                ),
            ))
        })?;

        let final_path = self.root.join(file_name);
        let temp_path = partial_path(&self.root, file_name);
        let guard = PartialFile::new(temp_path.clone());

        let mut file = tokio::fs::File::create(&temp_path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = content.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, &final_path).await?;
        guard.disarm();

        tracing::debug!(
            path = %final_path.display(),
            bytes = written,
            "Wrote artifact"
        );
        Ok(final_path)
    }
}
