//! API errors and their HTTP responses

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use texbox_core::protocol::ErrorBody;
use texbox_core::{CompileFailure, ErrorKind};
use thiserror::Error;

/// Seconds a client is asked to wait after `503`
const RETRY_AFTER_SECS: &str = "1";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("{0}")]
    Compile(CompileFailure),
}

impl ApiError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            Self::Compile(failure) => match failure.kind {
                ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::CompilerError | ErrorKind::NoOutputProduced | ErrorKind::OutputTooLarge => {
                    StatusCode::BAD_GATEWAY
                }
                ErrorKind::SandboxLaunchFailure => StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Busy => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    /// Name sent in the `error` field
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput.as_str(),
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden(_) => "Forbidden",
            Self::TemplateNotFound(_) => "TemplateNotFound",
            Self::Compile(failure) => failure.kind.as_str(),
        }
    }

    fn detail(self) -> String {
        match self {
            Self::InvalidInput(detail)
            | Self::Unauthorized(detail)
            | Self::Forbidden(detail)
            | Self::TemplateNotFound(detail) => detail,
            Self::Compile(failure) => failure.log_excerpt,
        }
    }
}

impl From<CompileFailure> for ApiError {
    fn from(failure: CompileFailure) -> Self {
        Self::Compile(failure)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.kind().to_string(),
            detail: self.detail(),
        };

        let mut response = (status, Json(body)).into_response();
        match status {
            StatusCode::SERVICE_UNAVAILABLE => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
            }
            StatusCode::UNAUTHORIZED => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}
