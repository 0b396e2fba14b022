//! texbox-daemon - sandboxed LaTeX compile service
//!
//! Serves `POST /api/v1/latex/compile-tectonic`, running every compile in
//! its own network-less container.

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook_tokio::Signals;
use std::sync::Arc;
use texbox_core::{Compiler, ContainerCompiler, Orchestrator};
use texbox_daemon::{AppState, DaemonConfig, router};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("texbox=info".parse()?))
        .init();

    let config = DaemonConfig::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "texbox-daemon starting");

    let sandbox = config.sandbox_config();
    tracing::info!(
        runtime = %sandbox.runtime.join(" "),
        image = %sandbox.image,
        max_concurrency = config.max_concurrency,
        max_queue_depth = config.max_queue_depth,
        "configuration loaded"
    );

    let compiler: Arc<dyn Compiler> = Arc::new(ContainerCompiler::new(sandbox)?);
    let orchestrator = Arc::new(Orchestrator::new(compiler, config.orchestrator_config()));

    if !orchestrator.is_ready().await {
        tracing::warn!(image = %config.image, "compiler image is not available, compiles will fail until it is");
    }

    let auth = config.auth_policy();
    if !auth.is_enabled() {
        tracing::warn!("no JWT secret configured, compile endpoint is unauthenticated");
    }

    let mut state = AppState::new(Arc::clone(&orchestrator), auth).with_readiness_ttl(config.readiness_ttl());
    if let Some(templates) = config.templates() {
        tracing::info!(dir = %templates.dir().display(), "templates enabled");
        state = state.with_templates(templates);
    }

    let signals = Signals::new([SIGTERM, SIGINT, SIGQUIT])?;
    let signals_handle = signals.handle();

    let listener = TcpListener::bind(config.socket_addr()).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(state, config.max_request_bytes))
        .with_graceful_shutdown(shutdown_signal(signals))
        .await?;

    signals_handle.close();
    orchestrator.shutdown().await;
    tracing::info!("texbox-daemon stopped");

    Ok(())
}

async fn shutdown_signal(mut signals: Signals) {
    if let Some(signal) = signals.next().await {
        tracing::info!(signal, "shutting down");
    }
}
