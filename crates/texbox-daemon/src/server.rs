//! HTTP routes

use crate::auth::{Principal, require_bearer};
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router, middleware};
use texbox_core::protocol::{COMPILE_PATH, CompileTectonicRequest, DURATION_HEADER, HEALTH_PATH, HealthResponse};
use texbox_core::{Artifact, CompileFailure, CompileRequest, ErrorKind, TexboxError, template};
use tower_http::trace::TraceLayer;

/// Build the service router
///
/// `GET /health` is always open; the compile route goes through the auth policy.
pub fn router(state: AppState, max_request_bytes: usize) -> Router {
    let compile = Router::new()
        .route(COMPILE_PATH, post(compile_tectonic))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route(HEALTH_PATH, get(health))
        .merge(compile)
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tracing::instrument(skip_all, fields(subject = tracing::field::Empty))]
async fn compile_tectonic(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    payload: Result<Json<CompileTectonicRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    if let Some(Extension(principal)) = &principal {
        tracing::Span::current().record("subject", principal.subject.as_str());
    }

    let Json(body) = payload.map_err(|rejection| ApiError::InvalidInput(rejection.body_text()))?;
    let options = body.options();
    let source = resolve_source(&state, body).await?;

    let artifact = state
        .orchestrator
        .compile(CompileRequest::new(source).with_options(options))
        .await
        .into_result()?;

    Ok(artifact_response(artifact))
}

/// Inline source wins; otherwise render the named template
async fn resolve_source(state: &AppState, body: CompileTectonicRequest) -> Result<String, ApiError> {
    if let Some(source) = body.tex_source {
        return Ok(source);
    }

    let Some(name) = body.template_name else {
        return Err(ApiError::InvalidInput("provide tex_source or template_name".into()));
    };
    let Some(store) = &state.templates else {
        return Err(ApiError::TemplateNotFound(name));
    };

    match store.load(&name).await {
        Ok(Some(text)) => Ok(template::render(&text, &body.patches)),
        Ok(None) => Err(ApiError::TemplateNotFound(name)),
        Err(TexboxError::Template(detail)) => Err(ApiError::InvalidInput(detail)),
        Err(e) => {
            tracing::error!(error = %e, template = %name, "failed to read template");
            Err(CompileFailure::new(ErrorKind::SandboxLaunchFailure, "template could not be read").into())
        }
    }
}

fn artifact_response(artifact: Artifact) -> Response {
    let headers = [
        (header::CONTENT_TYPE, artifact.mime_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", artifact.file_name()),
        ),
        (
            HeaderName::from_static(DURATION_HEADER),
            artifact.duration.as_millis().to_string(),
        ),
    ];

    (StatusCode::OK, headers, artifact.bytes).into_response()
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend_ready = state.readiness.check(&state.orchestrator).await;

    Json(HealthResponse {
        status: if backend_ready { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend_ready,
        limiter: state.orchestrator.status(),
    })
}
