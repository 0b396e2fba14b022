//! texbox CLI - compile LaTeX documents through the texbox service

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use texbox_core::config::default_server_url;
use texbox_core::protocol::{COMPILE_PATH, CompileTectonicRequest, ErrorBody, HEALTH_PATH, HealthResponse};
use texbox_core::{
    CompileOptions, CompileRequest, ContainerCompiler, Orchestrator, OrchestratorConfig, OutputFormat, SandboxConfig,
};

/// Slack on top of the compile timeout before the HTTP client gives up
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "texbox")]
#[command(author, version, about = "Sandboxed LaTeX compilation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a document through the daemon
    Compile {
        /// Source file (or - for stdin); omit when using --template
        #[arg(required_unless_present = "template")]
        input: Option<PathBuf>,

        /// Server template to render instead of a source file
        #[arg(long, conflicts_with = "input")]
        template: Option<String>,

        /// Template placeholder value, as key=value
        #[arg(long = "set", value_parser = parse_patch, requires = "template")]
        patches: Vec<(String, String)>,

        /// Output file (defaults to the input name with the format's extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Server URL (defaults to TEXBOX_URL env var or http://127.0.0.1:8000)
        #[arg(long)]
        url: Option<String>,

        /// Bearer token
        #[arg(long, env = "TEXBOX_TOKEN", hide_env_values = true)]
        token: Option<String>,

        #[arg(short, long, default_value = "pdf")]
        format: OutputFormat,

        /// Timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show daemon health
    Health {
        /// Server URL (defaults to TEXBOX_URL env var or http://127.0.0.1:8000)
        #[arg(long)]
        url: Option<String>,
    },

    /// Compile directly with a local container runtime (without daemon)
    Run {
        /// Source file (or - for stdin)
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compiler image
        #[arg(long, default_value = texbox_core::config::DEFAULT_IMAGE)]
        image: String,

        /// Container runtime command
        #[arg(long, default_value = "docker")]
        runtime: String,

        #[arg(short, long, default_value = "pdf")]
        format: OutputFormat,

        /// Timeout in seconds
        #[arg(short, long, default_value = "30", value_parser = clap::value_parser!(u64).range(1..))]
        timeout: u64,

        /// Memory limit in MB
        #[arg(short, long, default_value = "1024")]
        memory: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("texbox=warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            input,
            template,
            patches,
            output,
            url,
            token,
            format,
            timeout,
        } => {
            let mut request = match (&input, template) {
                (Some(input), _) => CompileTectonicRequest::source(read_source(input)?),
                (None, template) => CompileTectonicRequest {
                    template_name: template,
                    patches: patches
                        .into_iter()
                        .map(|(key, value)| (key, serde_json::Value::String(value)))
                        .collect::<BTreeMap<_, _>>(),
                    ..CompileTectonicRequest::default()
                },
            };
            request.timeout_sec = timeout;
            request.format = Some(format);

            let url = url.unwrap_or_else(default_server_url);
            let client_timeout = Duration::from_secs(timeout.unwrap_or(120)).saturating_add(CLIENT_TIMEOUT_SLACK);
            let client = reqwest::Client::builder().timeout(client_timeout).build()?;

            let mut call = client
                .post(format!("{}{COMPILE_PATH}", url.trim_end_matches('/')))
                .json(&request);
            if let Some(token) = token {
                call = call.bearer_auth(token);
            }

            tracing::debug!(%url, format = %format, "sending compile request");
            let response = call.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await?;
                return Err(match serde_json::from_str::<ErrorBody>(&body) {
                    Ok(error) => format!("{} ({status}): {}", error.error, error.detail).into(),
                    Err(_) => format!("server returned {status}: {body}").into(),
                });
            }

            let bytes = response.bytes().await?;
            let output = output.unwrap_or_else(|| output_path(input.as_deref(), format));
            std::fs::write(&output, &bytes)?;
            eprintln!("wrote {} ({} bytes)", output.display(), bytes.len());
        }

        Commands::Health { url } => {
            let url = url.unwrap_or_else(default_server_url);
            let health: HealthResponse = reqwest::get(format!("{}{HEALTH_PATH}", url.trim_end_matches('/')))
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }

        Commands::Run {
            input,
            output,
            image,
            runtime,
            format,
            timeout,
            memory,
        } => {
            let source = read_source(&input)?;

            let sandbox = SandboxConfig::builder()
                .runtime(&runtime)
                .image(image)
                .memory_limit_mb(memory)
                .build();
            let compiler = Arc::new(ContainerCompiler::new(sandbox)?);
            let orchestrator = Orchestrator::new(
                compiler,
                OrchestratorConfig {
                    default_timeout: Duration::from_secs(timeout),
                    max_timeout: Duration::from_secs(timeout),
                    max_concurrency: 1,
                    max_queue_depth: 0,
                    ..OrchestratorConfig::default()
                },
            );

            let request = CompileRequest::new(source).with_options(CompileOptions {
                format,
                timeout: None,
            });
            let artifact = orchestrator.compile(request).await.into_result()?;

            let output = output.unwrap_or_else(|| output_path(Some(&input), format));
            std::fs::write(&output, &artifact.bytes)?;
            eprintln!(
                "wrote {} ({} bytes in {} ms)",
                output.display(),
                artifact.bytes.len(),
                artifact.duration.as_millis()
            );
        }
    }

    Ok(())
}

fn read_source(input: &Path) -> std::io::Result<String> {
    if input == Path::new("-") {
        std::io::read_to_string(std::io::stdin())
    } else {
        std::fs::read_to_string(input)
    }
}

/// `paper.tex` -> `paper.pdf`; stdin and templates -> `document.pdf`
fn output_path(input: Option<&Path>, format: OutputFormat) -> PathBuf {
    match input {
        Some(path) if path != Path::new("-") => path.with_extension(format.extension()),
        _ => PathBuf::from(format!("document.{}", format.extension())),
    }
}

fn parse_patch(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}
