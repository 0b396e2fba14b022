//! Container-backed compiler
//!
//! Every job runs in its own short-lived container:
//! `<runtime> run --rm --name texbox-<id> --pull never <isolation flags>
//! --volume <workspace>:/data:rw <image> tectonic ... /data/<job>.tex`.
//! Containers are tracked from spawn until they exit. A job that times out,
//! is cancelled or writes more than `scratch_size` into its workspace is
//! stopped, and its container is force-removed before `compile` returns.

use crate::compiler::{CompileJob, Compiler, RunOutcome};
use crate::excerpt::{LogExcerpt, read_tail};
use crate::workspace::OutputState;
use crate::{CompileFailure, ErrorKind, OutputFormat, Result, SandboxConfig, TexboxError, Workspace};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::process::Command;
use uuid::Uuid;

/// Bytes of each output stream kept while the compiler runs
const CAPTURE_LIMIT: usize = 64 * 1024;

/// Exit codes the runtime reserves for its own failures:
/// 125 runtime error (image missing, bad flags), 126 command not
/// executable, 127 command not found in the image
const RUNTIME_FAILURE_CODES: [i32; 3] = [125, 126, 127];

/// Exit code of a container killed with SIGKILL (usually the OOM killer)
const KILLED_EXIT_CODE: i32 = 137;

const READY_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// How often a running job's workspace is measured
const USAGE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct ContainerCompiler {
    config: SandboxConfig,
    running: Arc<Mutex<HashSet<String>>>,
}

impl ContainerCompiler {
    /// Create a compiler for the given sandbox configuration
    ///
    /// # Errors
    /// Returns `TexboxError::Config` if the runtime command or image is empty.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        if config.runtime.first().is_none_or(String::is_empty) {
            return Err(TexboxError::Config("container runtime command is empty".into()));
        }
        if config.image.is_empty() {
            return Err(TexboxError::Config("compiler image is empty".into()));
        }
        if config.mount_point.to_str().is_none() {
            return Err(TexboxError::Config("mount point must be valid UTF-8".into()));
        }

        Ok(Self {
            config,
            running: Arc::default(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Containers started and not yet finished
    #[must_use]
    pub fn running(&self) -> usize {
        self.running.lock().len()
    }

    fn runtime_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.runtime[0]);
        cmd.args(&self.config.runtime[1..]).stdin(Stdio::null());
        cmd
    }

    /// Full argument list for one `run`
    ///
    /// # Errors
    /// Returns `TexboxError::Mount` if the workspace path cannot be mounted.
    pub fn run_args(&self, name: &str, workspace: &Workspace, format: OutputFormat) -> Result<Vec<String>> {
        let mount_point = self.config.mount_point.to_string_lossy().into_owned();

        let mut args: Vec<String> = ["run", "--rm", "--name", name, "--pull", "never"]
            .into_iter()
            .map(str::to_string)
            .collect();

        args.extend(self.config.namespaces.to_runtime_args());
        args.extend(self.config.privileges.to_runtime_args());
        args.extend(self.config.limits.to_runtime_args());
        args.extend(self.config.mounts_for(workspace.path()).to_runtime_args(self.config.relabel)?);

        args.push("--workdir".into());
        args.push(mount_point.clone());

        for (key, value) in &self.config.env {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }

        args.push(self.config.image.clone());
        args.push(self.config.compiler_path.clone());
        args.extend(self.config.compiler_args.iter().cloned());
        args.push("--outdir".into());
        args.push(mount_point.clone());
        args.push("--outfmt".into());
        args.push(format.compiler_arg().into());
        args.push(format!("{mount_point}/{}", workspace.input_file_name()));

        Ok(args)
    }

    /// Excerpt renderer that hides host details from callers
    fn excerpt(&self, workspace: &Workspace, name: &str) -> LogExcerpt {
        LogExcerpt::new(self.config.log_lines, self.config.log_bytes)
            .redact(workspace.path().to_string_lossy(), "<workspace>")
            .redact(self.config.image.clone(), "<image>")
            .redact(name, "<container>")
    }
}

#[async_trait]
impl Compiler for ContainerCompiler {
    #[tracing::instrument(skip_all, fields(container = tracing::field::Empty, format = %job.format))]
    async fn compile(&self, job: CompileJob<'_>) -> Result<RunOutcome> {
        let name = format!("texbox-{}", Uuid::new_v4().simple());
        tracing::Span::current().record("container", name.as_str());

        if self.config.privileges.needs_chown() {
            job.workspace
                .grant(self.config.privileges.uid, self.config.privileges.gid)?;
        }

        let args = self.run_args(&name, job.workspace, job.format)?;
        let excerpt = self.excerpt(job.workspace, &name);

        let mut child = self
            .runtime_command()
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TexboxError::Launch(format!("failed to start {}: {e}", self.config.runtime[0])))?;
        let mut guard = ContainerGuard::register(self, &name);

        tracing::debug!("container started");
        let start = Instant::now();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            let (out, err) = tokio::join!(capture(stdout), capture(stderr));
            let status = child.wait().await;
            (out, err, status)
        };

        let scratch_limit = self.config.scratch_size;
        let interrupt = tokio::select! {
            finished = run => Ok(finished),
            () = tokio::time::sleep(job.timeout) => Err(Interrupt::TimedOut),
            () = job.cancel.cancelled() => Err(Interrupt::Cancelled),
            used = watch_usage(job.workspace, scratch_limit) => Err(Interrupt::ScratchExceeded(used)),
        };

        let (out, err, status) = match interrupt {
            Ok(finished) => finished,
            Err(interrupt) => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!(error = %e, "runtime client already exited");
                }
                let _ = child.wait().await;

                // the container outlives its client; it must be gone before
                // the workspace is released
                guard.disarm();
                force_remove(self.runtime_command(), name.clone()).await;

                tracing::warn!(?interrupt, elapsed_ms = start.elapsed().as_millis(), "compile stopped");
                return Ok(RunOutcome::Failed(interrupt.failure(job.timeout, scratch_limit)));
            }
        };

        let status = status.map_err(|e| TexboxError::Launch(format!("failed to wait for container: {e}")))?;
        // `--rm` removes the container once it has exited
        guard.disarm();

        let mut log = out;
        log.extend_from_slice(&err);
        let elapsed_ms = start.elapsed().as_millis();

        let used = job.workspace.disk_usage().await?;
        if used > scratch_limit {
            tracing::warn!(used, limit = scratch_limit, elapsed_ms, "workspace grew past its limit");
            return Ok(RunOutcome::Failed(Interrupt::ScratchExceeded(used).failure(job.timeout, scratch_limit)));
        }

        let Some(code) = status.code() else {
            tracing::warn!(?status, elapsed_ms, "runtime client terminated by signal");
            return Ok(RunOutcome::Failed(CompileFailure::new(
                ErrorKind::CompilerError,
                excerpt.render(&log),
            )));
        };

        if RUNTIME_FAILURE_CODES.contains(&code) {
            let detail = LogExcerpt::new(self.config.log_lines, self.config.log_bytes).render(&log);
            return Err(TexboxError::Launch(format!(
                "container runtime exited with {code}: {detail}"
            )));
        }

        if code != 0 {
            tracing::info!(code, elapsed_ms, "compiler failed");
            let mut rendered = excerpt.render(&log);
            if code == KILLED_EXIT_CODE {
                rendered.push_str("\ncompiler was killed, possibly by the memory limit");
            }
            return Ok(RunOutcome::Failed(CompileFailure::new(ErrorKind::CompilerError, rendered)));
        }

        match job.workspace.output_state(job.format).await? {
            OutputState::Present(len) => {
                tracing::debug!(bytes = len, elapsed_ms, "compiler produced output");
                Ok(RunOutcome::Produced {
                    log: excerpt.render(&log),
                })
            }
            OutputState::Missing => {
                tracing::info!(elapsed_ms, "compiler exited cleanly without output");
                let mut rendered = excerpt.render(&log);
                if rendered.is_empty() {
                    rendered = format!("no {} output was produced", job.format);
                }
                Ok(RunOutcome::Failed(CompileFailure::new(ErrorKind::NoOutputProduced, rendered)))
            }
        }
    }

    async fn is_ready(&self) -> bool {
        let mut cmd = self.runtime_command();
        cmd.args(["image", "inspect", self.config.image.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(READY_CHECK_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "readiness check failed to start");
                false
            }
            Err(_) => {
                tracing::warn!("readiness check timed out");
                false
            }
        }
    }

    async fn shutdown(&self) {
        let names: Vec<String> = self.running.lock().drain().collect();
        if names.is_empty() {
            return;
        }

        tracing::info!(count = names.len(), "removing running containers");
        futures::future::join_all(
            names
                .into_iter()
                .map(|name| force_remove(self.runtime_command(), name)),
        )
        .await;
    }
}

/// Why a run was stopped before the runtime client exited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    TimedOut,
    Cancelled,
    ScratchExceeded(u64),
}

impl Interrupt {
    fn failure(self, timeout: Duration, scratch_limit: u64) -> CompileFailure {
        match self {
            Self::TimedOut => CompileFailure::new(
                ErrorKind::Timeout,
                format!("compilation exceeded {} ms", timeout.as_millis()),
            ),
            Self::Cancelled => CompileFailure::new(ErrorKind::Timeout, "compilation was cancelled"),
            Self::ScratchExceeded(_) => CompileFailure::new(
                ErrorKind::OutputTooLarge,
                format!("compiler wrote more than {scratch_limit} bytes to its workspace"),
            ),
        }
    }
}

/// Resolves with the usage once the workspace holds more than `limit` bytes
async fn watch_usage(workspace: &Workspace, limit: u64) -> u64 {
    let mut ticks = tokio::time::interval(USAGE_POLL);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        match workspace.disk_usage().await {
            Ok(used) if used > limit => return used,
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "failed to measure workspace"),
        }
    }
}

/// Tracks a started container; removes it on drop unless disarmed
struct ContainerGuard<'a> {
    compiler: &'a ContainerCompiler,
    name: String,
    armed: bool,
}

impl<'a> ContainerGuard<'a> {
    fn register(compiler: &'a ContainerCompiler, name: &str) -> Self {
        compiler.running.lock().insert(name.to_string());
        Self {
            compiler,
            name: name.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        self.compiler.running.lock().remove(&self.name);
        if !self.armed {
            return;
        }

        // dropped mid-run without a teardown; removal can no longer be awaited
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(container = %self.name, "compile abandoned, removing container in the background");
                handle.spawn(force_remove(self.compiler.runtime_command(), self.name.clone()));
            }
            Err(_) => tracing::warn!(container = %self.name, "no runtime available to remove container"),
        }
    }
}

async fn force_remove(mut cmd: Command, name: String) {
    cmd.args(["rm", "--force", name.as_str()])
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    match cmd.status().await {
        Ok(status) if status.success() => tracing::debug!(container = %name, "container removed"),
        Ok(status) => tracing::debug!(container = %name, ?status, "container already gone"),
        Err(e) => tracing::warn!(container = %name, error = %e, "failed to run container removal"),
    }
}

async fn capture<R: AsyncRead + Unpin>(stream: Option<R>) -> Vec<u8> {
    let Some(stream) = stream else {
        return Vec::new();
    };
    match read_tail(stream, CAPTURE_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "failed to read compiler output");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> ContainerCompiler {
        ContainerCompiler::new(
            SandboxConfig::builder()
                .runtime("podman")
                .image("tex:test")
                .user(1000, 1000)
                .build(),
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_runtime() {
        let config = SandboxConfig::builder().runtime("   ").build();
        assert!(matches!(ContainerCompiler::new(config), Err(TexboxError::Config(_))));
    }

    #[test]
    fn run_args_isolate_and_target_the_workspace() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), "document").unwrap();
        let args = compiler().run_args("texbox-1", &ws, OutputFormat::Pdf).unwrap();

        assert_eq!(&args[..6], ["run", "--rm", "--name", "texbox-1", "--pull", "never"]);
        assert!(args.windows(2).any(|w| w == ["--network", "none"]));
        assert!(args.windows(2).any(|w| w == ["--user", "1000:1000"]));
        assert!(args.contains(&"--read-only".to_string()));

        let volume = format!("{}:/data:rw", ws.path().display());
        assert!(args.windows(2).any(|w| w[0] == "--volume" && w[1] == volume));

        let image = args.iter().position(|a| a == "tex:test").unwrap();
        assert_eq!(args[image + 1], "tectonic");
        assert!(args[image..].windows(2).any(|w| w == ["--outfmt", "pdf"]));
        assert_eq!(args.last().unwrap(), "/data/document.tex");
    }

    #[test]
    fn excerpt_hides_host_details() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::create(root.path(), "document").unwrap();
        let compiler = compiler();

        let raw = format!(
            "Unable to find image 'tex:test'\n{}/document.tex: error in texbox-1",
            ws.path().display()
        );
        let rendered = compiler.excerpt(&ws, "texbox-1").render(raw.as_bytes());

        assert!(!rendered.contains(&*ws.path().to_string_lossy()));
        assert!(!rendered.contains("tex:test"));
        assert!(rendered.contains("<workspace>/document.tex"));
    }
}
