//! # texbox-core
//!
//! Sandboxed LaTeX compilation primitives.
//!
//! This crate provides the pieces behind the compile endpoint:
//! - Container isolation policy (network, mounts, cgroup limits, privileges)
//! - A `Compiler` capability with a container-backed implementation
//! - Per-request workspaces that never outlive their request
//! - A FIFO concurrency limiter with queue-depth backpressure
//! - The orchestrator that ties them together into `CompileResult`s

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod compiler;
pub mod config;
pub mod container;
pub mod error;
pub mod excerpt;
pub mod isolation;
pub mod limiter;
pub mod orchestrator;
pub mod protocol;
pub mod result;
pub mod template;
pub mod workspace;

pub use compiler::{CompileJob, Compiler, RunOutcome};
pub use config::{OrchestratorConfig, SandboxConfig};
pub use container::ContainerCompiler;
pub use error::TexboxError;
pub use limiter::{CompileLimiter, LimiterStatus};
pub use orchestrator::Orchestrator;
pub use result::{Artifact, CompileFailure, CompileOptions, CompileRequest, CompileResult, ErrorKind, OutputFormat};
pub use template::TemplateStore;
pub use workspace::Workspace;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, TexboxError>;
