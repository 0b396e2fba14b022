//! Bearer token authentication
//!
//! Tokens are HS256 JWTs with a required `exp` claim. A token that verifies
//! but carries no `sub` is authenticated yet not allowed to compile.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub exp: u64,
}

/// Authenticated caller, available to handlers as a request extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Check a token and extract its subject
    ///
    /// # Errors
    /// `Unauthorized` for malformed, forged or expired tokens, `Forbidden`
    /// when the token has no subject.
    pub fn verify(&self, token: &str) -> Result<Principal, ApiError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            ApiError::Unauthorized("invalid or expired token".into())
        })?;

        match data.claims.sub {
            Some(subject) if !subject.is_empty() => Ok(Principal { subject }),
            _ => Err(ApiError::Forbidden("token has no subject".into())),
        }
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum AuthPolicy {
    /// Every request is accepted
    Disabled,
    Bearer(Arc<JwtVerifier>),
}

impl AuthPolicy {
    #[must_use]
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) if !secret.is_empty() => Self::Bearer(Arc::new(JwtVerifier::new(secret))),
            _ => Self::Disabled,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Bearer(_))
    }
}

/// `Authorization: Bearer <token>`, scheme matched case-insensitively
fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Middleware guarding the compile route
///
/// # Errors
/// Rejects the request with `401` or `403` when auth is enabled.
pub async fn require_bearer(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let AuthPolicy::Bearer(verifier) = &state.auth else {
        return Ok(next.run(request).await);
    };

    let token = bearer_token(&request).ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
    let principal = verifier.verify(token)?;

    tracing::debug!(subject = %principal.subject, "request authenticated");
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}
