//! Filesystem mounts for the compile container

use crate::{Result, TexboxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for filesystem mounts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Mount the image root read-only
    pub read_only_root: bool,
    /// Read-only bind mounts (host, container)
    pub ro_binds: Vec<(PathBuf, PathBuf)>,
    /// Read-write bind mounts (host, container)
    pub rw_binds: Vec<(PathBuf, PathBuf)>,
    /// tmpfs mounts with size limits
    pub tmpfs: Vec<(PathBuf, u64)>,
}

impl MountConfig {
    /// Read-only root with a bounded `/tmp`
    #[must_use]
    pub fn hardened(scratch_bytes: u64) -> Self {
        Self {
            read_only_root: true,
            ..Self::default()
        }
        .tmpfs("/tmp", scratch_bytes)
    }

    /// Add a read-only bind mount
    #[must_use]
    pub fn ro_bind(mut self, src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        self.ro_binds.push((src.into(), dst.into()));
        self
    }

    /// Add a read-write bind mount
    #[must_use]
    pub fn rw_bind(mut self, src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        self.rw_binds.push((src.into(), dst.into()));
        self
    }

    /// Add a tmpfs mount with size limit in bytes
    #[must_use]
    pub fn tmpfs(mut self, path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        self.tmpfs.push((path.into(), size_bytes));
        self
    }

    /// Render runtime flags
    ///
    /// `relabel` appends the SELinux private label option (`Z`) to bind
    /// mounts.
    ///
    /// # Errors
    /// Returns `TexboxError::Mount` for relative paths, paths the volume
    /// syntax cannot express, or zero-sized tmpfs mounts.
    pub fn to_runtime_args(&self, relabel: bool) -> Result<Vec<String>> {
        let mut args = Vec::new();

        if self.read_only_root {
            args.push("--read-only".to_string());
        }

        for (path, size) in &self.tmpfs {
            // size=0 means unbounded for tmpfs
            if *size == 0 {
                return Err(TexboxError::Mount(format!(
                    "tmpfs at {} must have a non-zero size",
                    path.display()
                )));
            }
            args.push("--tmpfs".into());
            args.push(format!(
                "{}:rw,nosuid,nodev,noexec,size={size}",
                volume_path(path)?
            ));
        }

        for (src, dst) in &self.ro_binds {
            tracing::debug!(?src, ?dst, "ro bind mount");
            args.push("--volume".into());
            args.push(volume_spec(src, dst, "ro", relabel)?);
        }

        for (src, dst) in &self.rw_binds {
            tracing::debug!(?src, ?dst, "rw bind mount");
            args.push("--volume".into());
            args.push(volume_spec(src, dst, "rw", relabel)?);
        }

        Ok(args)
    }
}

fn volume_spec(src: &Path, dst: &Path, mode: &str, relabel: bool) -> Result<String> {
    let mut spec = format!("{}:{}:{mode}", volume_path(src)?, volume_path(dst)?);
    if relabel {
        spec.push_str(",Z");
    }
    Ok(spec)
}

fn volume_path(path: &Path) -> Result<&str> {
    let s = path
        .to_str()
        .ok_or_else(|| TexboxError::Mount(format!("non UTF-8 mount path: {}", path.display())))?;

    if !path.is_absolute() {
        return Err(TexboxError::Mount(format!("mount path must be absolute: {s}")));
    }
    if s.contains([':', ',']) {
        return Err(TexboxError::Mount(format!(
            "mount path must not contain ':' or ',': {s}"
        )));
    }

    Ok(s)
}
