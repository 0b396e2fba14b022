//! Compiler capability
//!
//! The orchestrator only talks to this trait, so the container-backed
//! implementation can be swapped for another backend.

use crate::{CompileFailure, OutputFormat, Result, Workspace};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One compilation handed to a compiler backend
#[derive(Debug, Clone)]
pub struct CompileJob<'a> {
    /// Workspace holding the single input file
    pub workspace: &'a Workspace,
    pub format: OutputFormat,
    /// Wall-clock budget for the run
    pub timeout: Duration,
    /// Fires when the caller gives up; the backend must stop its sandbox
    /// before returning
    pub cancel: CancellationToken,
}

impl<'a> CompileJob<'a> {
    #[must_use]
    pub fn new(workspace: &'a Workspace, format: OutputFormat, timeout: Duration) -> Self {
        Self {
            workspace,
            format,
            timeout,
            cancel: CancellationToken::new(),
        }
    }
}

/// What a backend observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The expected output file exists in the workspace
    Produced {
        /// Redacted tail of the compiler output
        log: String,
    },
    /// Compilation failed for a document-level reason
    Failed(CompileFailure),
}

#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile the workspace input
    ///
    /// Document failures (compiler errors, timeouts, missing output) are
    /// reported as `RunOutcome::Failed`. Once this returns nothing the
    /// backend started may still touch the workspace.
    ///
    /// # Errors
    /// Infrastructure faults: the sandbox could not be started or the
    /// workspace could not be prepared.
    async fn compile(&self, job: CompileJob<'_>) -> Result<RunOutcome>;

    /// Whether the backend can accept work
    async fn is_ready(&self) -> bool;

    /// Terminate anything still running
    async fn shutdown(&self);
}
