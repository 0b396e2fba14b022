//! Daemon configuration
//!
//! Every flag can also be set through a `TEXBOX_*` environment variable.

use crate::auth::AuthPolicy;
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use texbox_core::config::{DEFAULT_IMAGE, default_workspace_root};
use texbox_core::{OrchestratorConfig, SandboxConfig, TemplateStore};

#[derive(Debug, Clone, Parser)]
#[command(name = "texbox-daemon", version, about = "Sandboxed LaTeX compile service")]
pub struct DaemonConfig {
    /// Address to listen on
    #[arg(long, env = "TEXBOX_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    #[arg(long, env = "TEXBOX_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Container runtime command, e.g. `docker` or `sudo podman`
    #[arg(long, env = "TEXBOX_RUNTIME", default_value = "docker")]
    pub runtime: String,

    /// Image with the compiler and its cached bundle
    #[arg(long, env = "TEXBOX_IMAGE", default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Compiler binary inside the image
    #[arg(long, env = "TEXBOX_COMPILER", default_value = "tectonic")]
    pub compiler: String,

    /// Default compile timeout
    #[arg(long, env = "TEXBOX_TIMEOUT_SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_secs: u64,

    /// Upper bound for per-request timeouts
    #[arg(long, env = "TEXBOX_MAX_TIMEOUT_SECS", default_value_t = 120, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_timeout_secs: u64,

    #[arg(long, env = "TEXBOX_MAX_SOURCE_BYTES", default_value_t = 1024 * 1024)]
    pub max_source_bytes: usize,

    /// Largest request body accepted
    #[arg(long, env = "TEXBOX_MAX_REQUEST_BYTES", default_value_t = 4 * 1024 * 1024)]
    pub max_request_bytes: usize,

    #[arg(long, env = "TEXBOX_MAX_OUTPUT_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_output_bytes: u64,

    /// Compiles running at once
    #[arg(long, env = "TEXBOX_MAX_CONCURRENCY", default_value_t = 2)]
    pub max_concurrency: usize,

    /// Requests allowed to wait for a slot before `503`
    #[arg(long, env = "TEXBOX_MAX_QUEUE_DEPTH", default_value_t = 16)]
    pub max_queue_depth: usize,

    #[arg(long, env = "TEXBOX_MEMORY_MB", default_value_t = 1024)]
    pub memory_mb: u64,

    /// CPU quota in percent of one core
    #[arg(long, env = "TEXBOX_CPU_PERCENT", default_value_t = 100)]
    pub cpu_percent: u32,

    #[arg(long, env = "TEXBOX_PIDS_MAX", default_value_t = 128)]
    pub pids_max: u32,

    /// Size of the container's `/tmp`, and the most a compile may write to its workspace
    #[arg(long, env = "TEXBOX_SCRATCH_MB", default_value_t = 64)]
    pub scratch_mb: u64,

    /// Parent directory for per-request workspaces
    #[arg(long, env = "TEXBOX_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,

    /// Directory of templates usable through `template_name`
    #[arg(long, env = "TEXBOX_TEMPLATES_DIR")]
    pub templates_dir: Option<PathBuf>,

    /// HS256 secret for bearer tokens; auth is disabled when unset
    #[arg(long, env = "TEXBOX_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Seconds a readiness answer is reused by `GET /health`
    #[arg(long, env = "TEXBOX_HEALTH_CACHE_SECS", default_value_t = 5)]
    pub health_cache_secs: u64,

    /// Relabel the workspace mount for SELinux
    #[arg(long, env = "TEXBOX_RELABEL")]
    pub relabel: bool,
}

impl DaemonConfig {
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    #[must_use]
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig::builder()
            .runtime(&self.runtime)
            .image(&self.image)
            .compiler_path(&self.compiler)
            .memory_limit_mb(self.memory_mb)
            .cpu_limit(self.cpu_percent)
            .max_pids(self.pids_max)
            .scratch_size_mb(self.scratch_mb)
            .relabel(self.relabel)
            .build()
    }

    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            workspace_root: self
                .workspace_root
                .clone()
                .unwrap_or_else(default_workspace_root),
            max_source_bytes: self.max_source_bytes,
            max_output_bytes: self.max_output_bytes,
            default_timeout: Duration::from_secs(self.timeout_secs),
            max_timeout: Duration::from_secs(self.max_timeout_secs.max(self.timeout_secs)),
            max_concurrency: self.max_concurrency,
            max_queue_depth: self.max_queue_depth,
            ..OrchestratorConfig::default()
        }
    }

    #[must_use]
    pub const fn readiness_ttl(&self) -> Duration {
        Duration::from_secs(self.health_cache_secs)
    }

    #[must_use]
    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy::from_secret(self.jwt_secret.as_deref())
    }

    #[must_use]
    pub fn templates(&self) -> Option<TemplateStore> {
        self.templates_dir.as_deref().map(TemplateStore::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_core_config() {
        let config = DaemonConfig::try_parse_from([
            "texbox-daemon",
            "--runtime",
            "sudo podman",
            "--image",
            "tex:2",
            "--memory-mb",
            "512",
            "--timeout-secs",
            "10",
            "--max-timeout-secs",
            "60",
            "--workspace-root",
            "/srv/texbox",
        ])
        .unwrap();

        let sandbox = config.sandbox_config();
        assert_eq!(sandbox.runtime, vec!["sudo", "podman"]);
        assert_eq!(sandbox.image, "tex:2");
        assert_eq!(sandbox.limits.memory_max, 512 * 1024 * 1024);

        let orch = config.orchestrator_config();
        assert_eq!(orch.default_timeout, Duration::from_secs(10));
        assert_eq!(orch.max_timeout, Duration::from_secs(60));
        assert_eq!(orch.workspace_root, PathBuf::from("/srv/texbox"));
    }

    #[test]
    fn health_cache_defaults_to_five_seconds() {
        let config = DaemonConfig::try_parse_from(["texbox-daemon"]).unwrap();
        assert_eq!(config.readiness_ttl(), Duration::from_secs(5));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(DaemonConfig::try_parse_from(["texbox-daemon", "--timeout-secs", "0"]).is_err());
    }

    #[test]
    fn listens_on_host_and_port() {
        let config =
            DaemonConfig::try_parse_from(["texbox-daemon", "--host", "0.0.0.0", "--port", "9000"]).unwrap();
        assert_eq!(config.socket_addr(), "0.0.0.0:9000".parse().unwrap());
    }
}
