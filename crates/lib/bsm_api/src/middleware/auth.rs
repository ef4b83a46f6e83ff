//! Authentication guard: resolves the session and injects
//! [`AuthenticatedRequest`] into request extensions.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use bsm_core::models::auth::{Identity, Role};
use chrono::{DateTime, Utc};

use crate::AppState;
use crate::error::AppError;
use crate::services::session::resolve_session;

/// A request whose caller has been authenticated.
///
/// Only the session resolver creates this value. Handlers take it as an
/// extractor and read the identity from it, never from raw token claims.
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    identity: Identity,
    token_id: String,
    token_expires_at: DateTime<Utc>,
}

impl AuthenticatedRequest {
    pub(crate) fn new(identity: Identity, token_id: String, token_expires_at: DateTime<Utc>) -> Self {
        Self {
            identity,
            token_id,
            token_expires_at,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> i64 {
        self.identity.id
    }

    /// Current role from the credential store.
    pub fn role(&self) -> Role {
        self.identity.role
    }

    /// `jti` of the access token that authenticated the request.
    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn token_expires_at(&self) -> DateTime<Utc> {
        self.token_expires_at
    }
}

impl<S> FromRequestParts<S> for AuthenticatedRequest
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedRequest>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("authentication required".into()))
    }
}

/// Axum middleware: any active user.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = resolve_session(&state, request.headers(), None).await?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// State for [`require_roles`]: the app state plus the accepted roles.
#[derive(Clone)]
pub struct RoleGuard {
    state: AppState,
    roles: &'static [Role],
}

impl RoleGuard {
    pub fn new(state: AppState, roles: &'static [Role]) -> Self {
        Self { state, roles }
    }
}

/// Axum middleware: active users whose current role is in the guard's set.
pub async fn require_roles(
    State(guard): State<RoleGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = resolve_session(&guard.state, request.headers(), Some(guard.roles)).await?;
    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}
