//! Compile request and result types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Output format produced by the compiler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Portable Document Format
    #[default]
    Pdf,
    /// Extended DVI, the intermediate format before PDF conversion
    Xdv,
}

impl OutputFormat {
    /// File extension of the artifact, without the dot
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Xdv => "xdv",
        }
    }

    /// MIME type sent back to the caller
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Xdv => "application/x-xdv",
        }
    }

    /// Value for the compiler's `--outfmt` flag
    #[must_use]
    pub const fn compiler_arg(self) -> &'static str {
        self.extension()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "xdv" => Ok(Self::Xdv),
            other => Err(format!("unsupported output format: {other}")),
        }
    }
}

/// Per-request compile options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Artifact format
    pub format: OutputFormat,
    /// Timeout override, clamped by the orchestrator
    pub timeout: Option<Duration>,
}

/// A single compile request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Raw document markup
    pub source_text: String,
    pub options: CompileOptions,
}

impl CompileRequest {
    #[must_use]
    pub fn new(source_text: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            options: CompileOptions::default(),
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }
}

/// Failure taxonomy surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Empty or oversized source, bad options
    InvalidInput,
    /// Compilation exceeded its wall-clock budget
    Timeout,
    /// The compiler exited with an error
    CompilerError,
    /// The compiler exited cleanly but left no artifact
    NoOutputProduced,
    /// The artifact exceeds the configured output limit
    OutputTooLarge,
    /// The sandbox could not be started (runtime or image unavailable)
    SandboxLaunchFailure,
    /// Concurrency and queue are both saturated
    Busy,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "InvalidInput",
            Self::Timeout => "Timeout",
            Self::CompilerError => "CompilerError",
            Self::NoOutputProduced => "NoOutputProduced",
            Self::OutputTooLarge => "OutputTooLarge",
            Self::SandboxLaunchFailure => "SandboxLaunchFailure",
            Self::Busy => "Busy",
        }
    }

    /// Whether the caller may retry the same input unchanged
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Busy)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed compilation with a caller-safe log excerpt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    pub kind: ErrorKind,
    /// Bounded, redacted diagnostic text
    pub log_excerpt: String,
}

impl CompileFailure {
    #[must_use]
    pub fn new(kind: ErrorKind, log_excerpt: impl Into<String>) -> Self {
        Self {
            kind,
            log_excerpt: log_excerpt.into(),
        }
    }
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.log_excerpt.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.log_excerpt)
        }
    }
}

impl std::error::Error for CompileFailure {}

/// Compiled document returned to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    /// Time spent inside the sandbox
    pub duration: Duration,
}

impl Artifact {
    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!("document.{}", self.format.extension())
    }
}

/// Outcome of a compile call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    Success(Artifact),
    Failure(CompileFailure),
}

impl CompileResult {
    #[must_use]
    pub fn failure(kind: ErrorKind, log_excerpt: impl Into<String>) -> Self {
        Self::Failure(CompileFailure::new(kind, log_excerpt))
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Error kind, if this is a failure
    #[must_use]
    pub const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }

    /// Convert into a standard `Result`
    ///
    /// # Errors
    /// Returns the `CompileFailure` if compilation did not succeed.
    pub fn into_result(self) -> Result<Artifact, CompileFailure> {
        match self {
            Self::Success(artifact) => Ok(artifact),
            Self::Failure(failure) => Err(failure),
        }
    }
}
