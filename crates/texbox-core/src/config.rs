//! Sandbox and orchestrator configuration

use crate::isolation::{CgroupsConfig, MountConfig, NamespaceConfig, PrivilegeConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default compiler image
pub const DEFAULT_IMAGE: &str = "latex-tectonic:latest";

/// Configuration for the compile container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container runtime command, program first (e.g. `["docker"]`, `["sudo", "podman"]`)
    pub runtime: Vec<String>,

    /// Image bundling the compiler
    pub image: String,

    /// Compiler binary inside the image
    pub compiler_path: String,

    /// Extra compiler flags placed before the output options
    pub compiler_args: Vec<String>,

    /// Where the workspace is mounted inside the container
    pub mount_point: PathBuf,

    /// Size of the `/tmp` tmpfs in bytes, and the most a job may write to
    /// its workspace before it is stopped
    pub scratch_size: u64,

    /// Apply SELinux private labels to bind mounts
    pub relabel: bool,

    pub namespaces: NamespaceConfig,
    pub limits: CgroupsConfig,
    pub privileges: PrivilegeConfig,

    /// Environment variables
    pub env: Vec<(String, String)>,

    /// Lines of compiler output kept in failure excerpts
    pub log_lines: usize,

    /// Bytes of compiler output kept in failure excerpts
    pub log_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: vec!["docker".into()],
            image: DEFAULT_IMAGE.into(),
            compiler_path: "tectonic".into(),
            compiler_args: vec!["--untrusted".into(), "--chatter".into(), "minimal".into()],
            mount_point: PathBuf::from("/data"),
            scratch_size: 64 * 1024 * 1024, // 64MB
            relabel: false,
            namespaces: NamespaceConfig::default(),
            limits: CgroupsConfig::default(),
            privileges: PrivilegeConfig::default(),
            env: vec![("HOME".into(), "/tmp".into())],
            log_lines: 40,
            log_bytes: 4 * 1024,
        }
    }
}

impl SandboxConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> SandboxConfigBuilder {
        SandboxConfigBuilder::default()
    }

    /// Mount layout for one job, with the workspace bound at `mount_point`
    #[must_use]
    pub fn mounts_for(&self, workspace: impl Into<PathBuf>) -> MountConfig {
        MountConfig::hardened(self.scratch_size).rw_bind(workspace, self.mount_point.clone())
    }
}

/// Builder for SandboxConfig
#[derive(Debug, Default)]
pub struct SandboxConfigBuilder {
    config: SandboxConfig,
}

impl SandboxConfigBuilder {
    /// Runtime command line, split on whitespace
    #[must_use]
    pub fn runtime(mut self, command: &str) -> Self {
        self.config.runtime = command.split_whitespace().map(str::to_string).collect();
        self
    }

    #[must_use]
    pub fn runtime_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.runtime = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = image.into();
        self
    }

    #[must_use]
    pub fn compiler_path(mut self, path: impl Into<String>) -> Self {
        self.config.compiler_path = path.into();
        self
    }

    #[must_use]
    pub fn compiler_arg(mut self, arg: impl Into<String>) -> Self {
        self.config.compiler_args.push(arg.into());
        self
    }

    #[must_use]
    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.config.limits.memory_max = bytes;
        self
    }

    #[must_use]
    pub fn memory_limit_mb(self, mb: u64) -> Self {
        self.memory_limit(mb * 1024 * 1024)
    }

    #[must_use]
    pub fn cpu_limit(mut self, percent: u32) -> Self {
        self.config.limits.cpu_percent = percent.max(1);
        self
    }

    #[must_use]
    pub fn max_pids(mut self, pids: u32) -> Self {
        self.config.limits.pids_max = pids;
        self
    }

    #[must_use]
    pub fn scratch_size_mb(mut self, mb: u64) -> Self {
        self.config.scratch_size = mb * 1024 * 1024;
        self
    }

    #[must_use]
    pub fn relabel(mut self, relabel: bool) -> Self {
        self.config.relabel = relabel;
        self
    }

    #[must_use]
    pub fn user(mut self, uid: u32, gid: u32) -> Self {
        self.config.privileges.uid = uid;
        self.config.privileges.gid = gid;
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn build(self) -> SandboxConfig {
        self.config
    }
}

/// Configuration for the compile orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Parent directory of per-request workspaces
    pub workspace_root: PathBuf,

    /// Base name of the input and output files
    pub job_name: String,

    /// Largest accepted source in bytes
    pub max_source_bytes: usize,

    /// Largest artifact returned in bytes
    pub max_output_bytes: u64,

    /// Timeout used when the request has no override
    pub default_timeout: Duration,

    /// Upper bound for per-request timeout overrides
    pub max_timeout: Duration,

    /// Extra time the compiler gets to tear down before the orchestrator gives up
    pub kill_grace: Duration,

    /// Concurrent sandbox executions
    pub max_concurrency: usize,

    /// Callers allowed to wait for a slot
    pub max_queue_depth: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            job_name: "document".into(),
            max_source_bytes: 1024 * 1024,      // 1MB
            max_output_bytes: 10 * 1024 * 1024, // 10MB
            default_timeout: Duration::from_secs(30),
            max_timeout: Duration::from_secs(120),
            kill_grace: Duration::from_secs(5),
            max_concurrency: 2,
            max_queue_depth: 16,
        }
    }
}

/// `$TMPDIR/texbox`
#[must_use]
pub fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("texbox")
}

/// Get default server URL from TEXBOX_URL env var or the local default
///
/// Returns:
/// - `$TEXBOX_URL` if set
/// - `http://127.0.0.1:8000` otherwise
#[must_use]
pub fn default_server_url() -> String {
    std::env::var("TEXBOX_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string())
}
