//! Shared application state

use crate::auth::AuthPolicy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use texbox_core::{Orchestrator, TemplateStore};
use tokio::sync::Mutex;

/// How long a readiness answer is reused by `GET /health`
pub const DEFAULT_READINESS_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub auth: AuthPolicy,
    /// Unset when no templates directory is configured
    pub templates: Option<Arc<TemplateStore>>,
    pub readiness: Arc<Readiness>,
}

impl AppState {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, auth: AuthPolicy) -> Self {
        Self {
            orchestrator,
            auth,
            templates: None,
            readiness: Arc::new(Readiness::new(DEFAULT_READINESS_TTL)),
        }
    }

    #[must_use]
    pub fn with_templates(mut self, templates: TemplateStore) -> Self {
        self.templates = Some(Arc::new(templates));
        self
    }

    #[must_use]
    pub fn with_readiness_ttl(mut self, ttl: Duration) -> Self {
        self.readiness = Arc::new(Readiness::new(ttl));
        self
    }
}

/// Backend readiness, checked at most once per `ttl`
///
/// Concurrent callers share one check: the lock is held while it runs.
#[derive(Debug)]
pub struct Readiness {
    ttl: Duration,
    last: Mutex<Option<(Instant, bool)>>,
}

impl Readiness {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last: Mutex::new(None),
        }
    }

    pub async fn check(&self, orchestrator: &Orchestrator) -> bool {
        let mut last = self.last.lock().await;
        if let Some((checked_at, ready)) = *last {
            if checked_at.elapsed() < self.ttl {
                return ready;
            }
        }

        let ready = orchestrator.is_ready().await;
        tracing::debug!(ready, "backend readiness checked");
        *last = Some((Instant::now(), ready));
        ready
    }
}
