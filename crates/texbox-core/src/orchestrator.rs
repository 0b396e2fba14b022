//! Compile orchestration
//!
//! Turns a `CompileRequest` into a `CompileResult`: validates input, takes a
//! slot from the limiter and runs the compiler in a fresh workspace.
//!
//! Each attempt runs on its own task that owns the workspace and the slot.
//! Dropping the caller's future cancels the attempt, but the task still
//! waits for the backend to stop its sandbox before the workspace is removed
//! and the slot is released.

use crate::compiler::{CompileJob, Compiler, RunOutcome};
use crate::limiter::{CompileLimiter, CompilePermit, LimiterStatus};
use crate::workspace::OutputRead;
use crate::{
    Artifact, CompileFailure, CompileRequest, CompileResult, ErrorKind, OrchestratorConfig, OutputFormat, Workspace,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Detail returned for infrastructure faults; the cause is only logged
const LAUNCH_FAILURE_DETAIL: &str = "compile sandbox is unavailable";

fn launch_failure() -> CompileFailure {
    CompileFailure::new(ErrorKind::SandboxLaunchFailure, LAUNCH_FAILURE_DETAIL)
}

pub struct Orchestrator {
    compiler: Arc<dyn Compiler>,
    limiter: CompileLimiter,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[must_use]
    pub fn new(compiler: Arc<dyn Compiler>, config: OrchestratorConfig) -> Self {
        Self {
            limiter: CompileLimiter::new(config.max_concurrency, config.max_queue_depth),
            compiler,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    #[must_use]
    pub fn status(&self) -> LimiterStatus {
        self.limiter.status()
    }

    pub async fn is_ready(&self) -> bool {
        self.compiler.is_ready().await
    }

    pub async fn shutdown(&self) {
        self.compiler.shutdown().await;
    }

    /// Compile one document
    ///
    /// Never fails with an `Err`; every problem is a `CompileResult::Failure`.
    #[tracing::instrument(
        skip_all,
        fields(source_bytes = request.source_text.len(), format = %request.options.format)
    )]
    pub async fn compile(&self, request: CompileRequest) -> CompileResult {
        let timeout = match self.validate(&request) {
            Ok(timeout) => timeout,
            Err(failure) => {
                tracing::debug!(kind = %failure.kind, "request rejected");
                return CompileResult::Failure(failure);
            }
        };

        let Ok(permit) = self.limiter.acquire().await else {
            tracing::warn!(status = ?self.limiter.status(), "compile rejected, queue is full");
            return CompileResult::failure(ErrorKind::Busy, "too many compilations in progress, retry later");
        };

        let workspace = match Workspace::create(&self.config.workspace_root, &self.config.job_name) {
            Ok(workspace) => workspace,
            Err(e) => {
                tracing::error!(error = %e, "failed to create workspace");
                return CompileResult::Failure(launch_failure());
            }
        };

        let format = request.options.format;
        let cancel = CancellationToken::new();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let attempt = Attempt {
            compiler: Arc::clone(&self.compiler),
            workspace,
            format,
            timeout,
            kill_grace: self.config.kill_grace,
            max_output_bytes: self.config.max_output_bytes,
            cancel,
        };

        let start = Instant::now();
        let task = tokio::spawn(
            attempt
                .execute(request.source_text, permit)
                .instrument(tracing::Span::current()),
        );
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "compile task failed");
                Err(launch_failure())
            }
        };
        let duration = start.elapsed();

        let elapsed_ms = duration.as_millis();
        match outcome {
            Ok(bytes) => {
                tracing::info!(elapsed_ms, bytes = bytes.len(), "compile succeeded");
                CompileResult::Success(Artifact {
                    bytes,
                    format,
                    duration,
                })
            }
            Err(failure) => {
                tracing::info!(elapsed_ms, kind = %failure.kind, "compile failed");
                CompileResult::Failure(failure)
            }
        }
    }

    /// Effective timeout for a valid request
    fn validate(&self, request: &CompileRequest) -> Result<Duration, CompileFailure> {
        let source = &request.source_text;
        if source.trim().is_empty() {
            return Err(CompileFailure::new(ErrorKind::InvalidInput, "source is empty"));
        }
        if source.len() > self.config.max_source_bytes {
            return Err(CompileFailure::new(
                ErrorKind::InvalidInput,
                format!(
                    "source is {} bytes, limit is {}",
                    source.len(),
                    self.config.max_source_bytes
                ),
            ));
        }

        match request.options.timeout {
            None => Ok(self.config.default_timeout.min(self.config.max_timeout)),
            Some(timeout) if timeout.is_zero() => Err(CompileFailure::new(
                ErrorKind::InvalidInput,
                "timeout must be greater than zero",
            )),
            Some(timeout) => Ok(timeout.min(self.config.max_timeout)),
        }
    }
}

/// One compile in its own workspace
struct Attempt {
    compiler: Arc<dyn Compiler>,
    workspace: Workspace,
    format: OutputFormat,
    timeout: Duration,
    kill_grace: Duration,
    max_output_bytes: u64,
    cancel: CancellationToken,
}

impl Attempt {
    async fn execute(self, source: String, permit: CompilePermit) -> Result<Vec<u8>, CompileFailure> {
        let outcome = self.run(&source).await;

        if let Err(e) = self.workspace.close() {
            tracing::error!(error = %e, "failed to remove workspace");
        }
        drop(permit);

        outcome
    }

    async fn run(&self, source: &str) -> Result<Vec<u8>, CompileFailure> {
        if let Err(e) = self.workspace.write_source(source).await {
            tracing::error!(error = %e, "failed to write source");
            return Err(launch_failure());
        }

        let job = CompileJob {
            workspace: &self.workspace,
            format: self.format,
            timeout: self.timeout,
            cancel: self.cancel.clone(),
        };

        // the compiler enforces `timeout` itself; this only catches a hung backend
        let deadline = self.timeout.saturating_add(self.kill_grace);
        let compile = self.compiler.compile(job);
        tokio::pin!(compile);

        let finished = tokio::select! {
            result = &mut compile => Some(result),
            () = tokio::time::sleep(deadline) => {
                tracing::warn!(deadline_ms = deadline.as_millis(), "compiler missed its deadline");
                None
            }
            () = self.cancel.cancelled() => {
                tracing::info!("compile cancelled by caller");
                None
            }
        };

        let Some(result) = finished else {
            self.cancel.cancel();
            if tokio::time::timeout(self.kill_grace, &mut compile).await.is_err() {
                tracing::error!(grace_ms = self.kill_grace.as_millis(), "compiler ignored cancellation");
            }
            return Err(CompileFailure::new(
                ErrorKind::Timeout,
                format!("compilation exceeded {} ms", self.timeout.as_millis()),
            ));
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "sandbox launch failed");
                return Err(launch_failure());
            }
        };

        let log = match outcome {
            RunOutcome::Failed(failure) => return Err(failure),
            RunOutcome::Produced { log } => log,
        };

        match self.workspace.read_output(self.format, self.max_output_bytes).await {
            Ok(OutputRead::Ready(bytes)) => Ok(bytes),
            Ok(OutputRead::TooLarge(len)) => Err(CompileFailure::new(
                ErrorKind::OutputTooLarge,
                format!("output is {len} bytes, limit is {}", self.max_output_bytes),
            )),
            Ok(OutputRead::Missing) => Err(CompileFailure::new(ErrorKind::NoOutputProduced, log)),
            Err(e) => {
                tracing::error!(error = %e, "failed to read output");
                Err(launch_failure())
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
