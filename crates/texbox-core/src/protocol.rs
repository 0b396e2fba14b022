//! Wire protocol for the compile service
//!
//! JSON bodies shared by the daemon and the CLI.

use crate::limiter::LimiterStatus;
use crate::{CompileFailure, CompileOptions, OutputFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Compile endpoint
pub const COMPILE_PATH: &str = "/api/v1/latex/compile-tectonic";

/// Health endpoint
pub const HEALTH_PATH: &str = "/health";

/// Response header carrying the time spent compiling
pub const DURATION_HEADER: &str = "x-compile-duration-ms";

/// Body of a compile request
///
/// Either `tex_source`, or `template_name` with optional `patches`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileTectonicRequest {
    /// Document markup; takes precedence over `template_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tex_source: Option<String>,

    /// Template file in the server's templates directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,

    /// Values substituted for `{{key}}` placeholders in the template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub patches: BTreeMap<String, serde_json::Value>,

    /// Timeout override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
}

impl CompileTectonicRequest {
    #[must_use]
    pub fn source(tex_source: impl Into<String>) -> Self {
        Self {
            tex_source: Some(tex_source.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn options(&self) -> CompileOptions {
        CompileOptions {
            format: self.format.unwrap_or_default(),
            timeout: self.timeout_sec.map(Duration::from_secs),
        }
    }
}

/// Body of every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error kind name, e.g. `CompilerError`
    pub error: String,
    /// Human-readable detail, never containing host details
    pub detail: String,
}

impl From<&CompileFailure> for ErrorBody {
    fn from(failure: &CompileFailure) -> Self {
        Self {
            error: failure.kind.as_str().to_string(),
            detail: failure.log_excerpt.clone(),
        }
    }
}

/// Body of `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` when the backend can accept work, `degraded` otherwise
    pub status: String,
    pub version: String,
    pub backend_ready: bool,
    pub limiter: LimiterStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn every_field_is_optional() {
        let request: CompileTectonicRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, CompileTectonicRequest::default());
        assert_eq!(request.options(), CompileOptions::default());
    }

    #[test]
    fn template_request_parses() {
        let request: CompileTectonicRequest = serde_json::from_str(
            r#"{"template_name": "onepage.tex", "patches": {"name": "Ada", "year": 1843},
                "timeout_sec": 20, "format": "xdv"}"#,
        )
        .unwrap();

        assert_eq!(request.template_name.as_deref(), Some("onepage.tex"));
        assert_eq!(request.patches["year"], serde_json::json!(1843));
        let options = request.options();
        assert_eq!(options.format, OutputFormat::Xdv);
        assert_eq!(options.timeout, Some(Duration::from_secs(20)));
    }

    #[test]
    fn error_body_uses_kind_name() {
        let body = ErrorBody::from(&CompileFailure::new(ErrorKind::Timeout, "too slow"));
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            serde_json::json!({"error": "Timeout", "detail": "too slow"})
        );
    }
}
