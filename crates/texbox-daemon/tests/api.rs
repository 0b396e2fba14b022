//! HTTP contract of the compile service, driven through the router

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use texbox_core::protocol::{COMPILE_PATH, HEALTH_PATH};
use texbox_core::{
    CompileFailure, CompileJob, Compiler, ErrorKind, Orchestrator, OrchestratorConfig, RunOutcome, TemplateStore,
    TexboxError,
};
use texbox_daemon::auth::Claims;
use texbox_daemon::{AppState, AuthPolicy, router};
use tokio::sync::Semaphore;
use tower::ServiceExt;

const SECRET: &str = "api-test-secret";
const MINIMAL: &str = "\\documentclass{article}\\begin{document}Hi\\end{document}";

/// Backend whose behaviour is chosen by markers in the source
struct FakeCompiler {
    gate: Arc<Semaphore>,
    sources: Mutex<Vec<String>>,
    readiness_checks: AtomicUsize,
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn compile(&self, job: CompileJob<'_>) -> texbox_core::Result<RunOutcome> {
        let source = std::fs::read_to_string(job.workspace.input_path())?;
        self.sources.lock().unwrap().push(source.clone());

        if source.contains("HOLD") {
            self.gate.acquire().await.unwrap().forget();
        }
        if source.contains("TIMEOUT") {
            return Ok(RunOutcome::Failed(CompileFailure::new(ErrorKind::Timeout, "too slow")));
        }
        if source.contains("CRASH") {
            return Ok(RunOutcome::Failed(CompileFailure::new(
                ErrorKind::CompilerError,
                "! Undefined control sequence.",
            )));
        }
        if source.contains("LAUNCH") {
            return Err(TexboxError::Launch("no such image at /var/lib/secret".into()));
        }

        std::fs::write(job.workspace.output_path(job.format), b"%PDF-1.5 fake")?;
        Ok(RunOutcome::Produced { log: String::new() })
    }

    async fn is_ready(&self) -> bool {
        self.readiness_checks.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn shutdown(&self) {}
}

struct TestApp {
    router: Router,
    orchestrator: Arc<Orchestrator>,
    compiler: Arc<FakeCompiler>,
    _root: tempfile::TempDir,
    _templates: tempfile::TempDir,
}

fn app(auth: AuthPolicy, with_templates: bool) -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let templates = tempfile::tempdir().unwrap();
    std::fs::write(templates.path().join("onepage.tex"), "Hello {{name}}, {{year}}").unwrap();

    let compiler = Arc::new(FakeCompiler {
        gate: Arc::new(Semaphore::new(0)),
        sources: Mutex::new(Vec::new()),
        readiness_checks: AtomicUsize::new(0),
    });
    let orchestrator = Arc::new(Orchestrator::new(
        compiler.clone(),
        OrchestratorConfig {
            workspace_root: root.path().to_path_buf(),
            max_concurrency: 1,
            max_queue_depth: 0,
            default_timeout: Duration::from_secs(10),
            ..OrchestratorConfig::default()
        },
    ));

    let mut state = AppState::new(orchestrator.clone(), auth);
    if with_templates {
        state = state.with_templates(TemplateStore::new(templates.path()));
    }

    TestApp {
        router: router(state, 64 * 1024),
        orchestrator,
        compiler,
        _root: root,
        _templates: templates,
    }
}

fn open_app() -> TestApp {
    app(AuthPolicy::Disabled, true)
}

fn compile_request(body: &Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(COMPILE_PATH)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn token(sub: Option<&str>, ttl: i64) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let claims = Claims {
        sub: sub.map(str::to_string),
        exp: now.saturating_add_signed(ttl),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

#[tokio::test]
async fn minimal_document_returns_pdf() {
    let app = open_app();

    let response = send(&app.router, compile_request(&json!({"tex_source": MINIMAL}), None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(headers[header::CONTENT_DISPOSITION], "inline; filename=\"document.pdf\"");
    assert!(headers.contains_key("x-compile-duration-ms"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn xdv_output_has_its_own_content_type() {
    let app = open_app();

    let response = send(
        &app.router,
        compile_request(&json!({"tex_source": MINIMAL, "format": "xdv"}), None),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-xdv");
}

#[tokio::test]
async fn empty_source_is_invalid_input() {
    let app = open_app();

    let response = send(&app.router, compile_request(&json!({"tex_source": ""}), None)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "InvalidInput");
}

#[tokio::test]
async fn malformed_requests_are_invalid_input() {
    let app = open_app();

    let garbage = Request::builder()
        .method("POST")
        .uri(COMPILE_PATH)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let no_content_type = Request::builder()
        .method("POST")
        .uri(COMPILE_PATH)
        .body(Body::from(json!({"tex_source": MINIMAL}).to_string()))
        .unwrap();
    let oversized = compile_request(&json!({"tex_source": "x".repeat(128 * 1024)}), None);

    for request in [garbage, no_content_type, oversized] {
        let response = send(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "InvalidInput");
    }

    let response = send(&app.router, compile_request(&json!({}), None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failures_map_to_statuses() {
    let app = open_app();
    let cases = [
        ("TIMEOUT", StatusCode::GATEWAY_TIMEOUT, "Timeout"),
        ("CRASH", StatusCode::BAD_GATEWAY, "CompilerError"),
        ("LAUNCH", StatusCode::INTERNAL_SERVER_ERROR, "SandboxLaunchFailure"),
    ];

    for (marker, status, kind) in cases {
        let response = send(&app.router, compile_request(&json!({"tex_source": marker}), None)).await;
        assert_eq!(response.status(), status, "{marker}");

        let body = json_body(response).await;
        assert_eq!(body["error"], kind);
        assert!(!body["detail"].as_str().unwrap().contains("/var/lib"));
    }
}

#[tokio::test]
async fn compiler_errors_include_the_log_excerpt() {
    let app = open_app();

    let response = send(&app.router, compile_request(&json!({"tex_source": "CRASH"}), None)).await;

    assert_eq!(
        json_body(response).await["detail"],
        "! Undefined control sequence."
    );
}

#[tokio::test]
async fn saturation_returns_503_with_retry_after() {
    let app = open_app();

    let held = tokio::spawn(
        app.router
            .clone()
            .oneshot(compile_request(&json!({"tex_source": "HOLD"}), None)),
    );
    while app.orchestrator.status().active == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let response = send(&app.router, compile_request(&json!({"tex_source": MINIMAL}), None)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(json_body(response).await["error"], "Busy");

    app.compiler.gate.add_permits(1);
    assert_eq!(held.await.unwrap().unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn templates_are_rendered_with_patches() {
    let app = open_app();

    let response = send(
        &app.router,
        compile_request(
            &json!({"template_name": "onepage.tex", "patches": {"name": "Ada", "year": 1843}}),
            None,
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.compiler.sources.lock().unwrap().as_slice(), ["Hello Ada, 1843"]);
}

#[tokio::test]
async fn inline_source_wins_over_template() {
    let app = open_app();

    let response = send(
        &app.router,
        compile_request(&json!({"tex_source": MINIMAL, "template_name": "onepage.tex"}), None),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.compiler.sources.lock().unwrap().as_slice(), [MINIMAL]);
}

#[tokio::test]
async fn unknown_templates_are_404() {
    let app = open_app();
    let response = send(&app.router, compile_request(&json!({"template_name": "missing.tex"}), None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "TemplateNotFound");

    let response = send(&app.router, compile_request(&json!({"template_name": "../onepage.tex"}), None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let no_dir = app_without_templates();
    let response = send(&no_dir.router, compile_request(&json!({"template_name": "onepage.tex"}), None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

fn app_without_templates() -> TestApp {
    app(AuthPolicy::Disabled, false)
}

#[tokio::test]
async fn bearer_token_is_required_when_configured() {
    let app = app(AuthPolicy::from_secret(Some(SECRET)), true);
    let body = json!({"tex_source": MINIMAL});

    let response = send(&app.router, compile_request(&body, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "Unauthorized");

    for bad in ["garbage".to_string(), token(Some("ada"), -600)] {
        let response = send(&app.router, compile_request(&body, Some(&bad))).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = send(&app.router, compile_request(&body, Some(&token(None, 600)))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "Forbidden");

    let response = send(&app.router, compile_request(&body, Some(&token(Some("ada"), 600)))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn rejected_tokens_never_reach_the_compiler() {
    let app = app(AuthPolicy::from_secret(Some(SECRET)), true);

    send(&app.router, compile_request(&json!({"tex_source": MINIMAL}), None)).await;

    assert!(app.compiler.sources.lock().unwrap().is_empty());
}

#[tokio::test]
async fn health_is_open_and_reports_limiter() {
    let app = app(AuthPolicy::from_secret(Some(SECRET)), true);

    let request = Request::builder().uri(HEALTH_PATH).body(Body::empty()).unwrap();
    let response = send(&app.router, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend_ready"], true);
    assert_eq!(body["limiter"]["max_concurrency"], 1);
    assert_eq!(body["limiter"]["active"], 0);
}

#[tokio::test]
async fn health_reuses_a_recent_readiness_check() {
    let app = open_app();

    for _ in 0..5 {
        let request = Request::builder().uri(HEALTH_PATH).body(Body::empty()).unwrap();
        let response = send(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["backend_ready"], true);
    }

    assert_eq!(app.compiler.readiness_checks.load(Ordering::SeqCst), 1);
}
