//! Per-request compile workspaces
//!
//! A workspace is a uniquely named directory under the configured root that
//! holds one input file and whatever the compiler writes next to it. It is
//! removed when the `Workspace` is closed or dropped, so it cannot outlive
//! the request that created it, even when that request is cancelled.

use crate::{OutputFormat, Result, TexboxError};
use nix::unistd::{Gid, Uid, chown};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

/// State of the expected output file after the compiler exits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Nothing usable: absent, or not a regular file
    Missing,
    /// Regular file of the given size
    Present(u64),
}

/// Artifact read back from a workspace
#[derive(Debug, PartialEq, Eq)]
pub enum OutputRead {
    Missing,
    TooLarge(u64),
    Ready(Vec<u8>),
}

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    job_name: String,
}

impl Workspace {
    /// Create a fresh workspace under `root`
    ///
    /// # Errors
    /// Returns `TexboxError::Workspace` if the root or the directory cannot
    /// be created, or the job name is not a plain file stem.
    pub fn create(root: &Path, job_name: &str) -> Result<Self> {
        if job_name.is_empty() || !job_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(TexboxError::Workspace(format!("invalid job name: {job_name:?}")));
        }

        std::fs::create_dir_all(root)
            .map_err(|e| TexboxError::Workspace(format!("failed to create workspace root: {e}")))?;

        let dir = tempfile::Builder::new()
            .prefix("texbox-")
            .tempdir_in(root)
            .map_err(|e| TexboxError::Workspace(format!("failed to create workspace: {e}")))?;

        tracing::debug!(workspace = %dir.path().display(), "workspace created");

        Ok(Self {
            dir,
            job_name: job_name.to_string(),
        })
    }

    /// Host path of the workspace directory
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// File name of the single input slot
    #[must_use]
    pub fn input_file_name(&self) -> String {
        format!("{}.tex", self.job_name)
    }

    #[must_use]
    pub fn input_path(&self) -> PathBuf {
        self.path().join(self.input_file_name())
    }

    /// File name the compiler produces for `format`
    #[must_use]
    pub fn output_file_name(&self, format: OutputFormat) -> String {
        format!("{}.{}", self.job_name, format.extension())
    }

    #[must_use]
    pub fn output_path(&self, format: OutputFormat) -> PathBuf {
        self.path().join(self.output_file_name(format))
    }

    /// Write the document source into the input slot
    ///
    /// The slot can only be filled once.
    ///
    /// # Errors
    /// Returns an io error if the input already exists or cannot be written.
    pub async fn write_source(&self, source: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.input_path())
            .await?;
        file.write_all(source.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Hand the directory to the container identity
    ///
    /// # Errors
    /// Returns the underlying `chown` failure.
    pub fn grant(&self, uid: u32, gid: u32) -> Result<()> {
        chown(self.path(), Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))?;
        Ok(())
    }

    /// Inspect the expected output without following symlinks
    ///
    /// # Errors
    /// Returns io errors other than "not found".
    pub async fn output_state(&self, format: OutputFormat) -> Result<OutputState> {
        match tokio::fs::symlink_metadata(self.output_path(format)).await {
            Ok(meta) if meta.file_type().is_file() => Ok(OutputState::Present(meta.len())),
            Ok(meta) => {
                tracing::warn!(file_type = ?meta.file_type(), "output is not a regular file");
                Ok(OutputState::Missing)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(OutputState::Missing),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the artifact if it is a regular file no larger than `max_bytes`
    ///
    /// # Errors
    /// Returns io errors from reading the file.
    pub async fn read_output(&self, format: OutputFormat, max_bytes: u64) -> Result<OutputRead> {
        match self.output_state(format).await? {
            OutputState::Missing => Ok(OutputRead::Missing),
            OutputState::Present(len) if len > max_bytes => Ok(OutputRead::TooLarge(len)),
            OutputState::Present(_) => {
                let bytes = tokio::fs::read(self.output_path(format)).await?;
                // the file may have grown between stat and read
                if bytes.len() as u64 > max_bytes {
                    return Ok(OutputRead::TooLarge(bytes.len() as u64));
                }
                Ok(OutputRead::Ready(bytes))
            }
        }
    }

    /// Bytes held by everything under the workspace
    ///
    /// Symlinks are counted, not followed. Entries that vanish mid-scan
    /// are skipped.
    ///
    /// # Errors
    /// Returns io errors other than "not found", or a failed scan task.
    pub async fn disk_usage(&self) -> Result<u64> {
        let root = self.path().to_path_buf();
        tokio::task::spawn_blocking(move || tree_usage(&root))
            .await
            .map_err(|e| TexboxError::Workspace(format!("usage scan failed: {e}")))?
            .map_err(Into::into)
    }

    /// Remove the workspace and everything in it
    ///
    /// # Errors
    /// Returns the removal error; the directory may be partially removed.
    pub fn close(self) -> Result<()> {
        let path = self.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| TexboxError::Workspace(format!("failed to remove {}: {e}", path.display())))?;
        tracing::debug!(workspace = %path.display(), "workspace removed");
        Ok(())
    }
}

fn skip_missing<T>(e: std::io::Error) -> std::io::Result<Option<T>> {
    if e.kind() == std::io::ErrorKind::NotFound {
        Ok(None)
    } else {
        Err(e)
    }
}

fn tree_usage(root: &Path) -> std::io::Result<u64> {
    let mut total: u64 = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Some(entries) = std::fs::read_dir(&dir).map(Some).or_else(skip_missing)? else {
            continue;
        };
        for entry in entries {
            let entry = entry?;
            // `DirEntry::metadata` does not traverse symlinks
            let Some(meta) = entry.metadata().map(Some).or_else(skip_missing)? else {
                continue;
            };
            if meta.is_dir() {
                pending.push(entry.path());
            }
            // sparse files count at their apparent size
            total = total.saturating_add(meta.len().max(meta.blocks().saturating_mul(512)));
        }
    }
    Ok(total)
}
