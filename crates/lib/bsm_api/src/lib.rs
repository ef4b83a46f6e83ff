//! # bsm_api
//!
//! HTTP authentication API for BSM.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use bsm_core::auth::jwt::TokenService;
use bsm_core::auth::password::PasswordHasher;
use bsm_core::auth::revocation::RevocationList;
use bsm_core::auth::store::CredentialStore;
use bsm_core::models::auth::Role;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{auth, health};
use crate::middleware::auth::{RoleGuard, require_auth, require_roles};

/// Roles allowed to revoke other users' sessions.
const SESSION_ADMIN_ROLES: &[Role] = &[Role::Admin, Role::Manager];

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Users and refresh/reset token rows.
    pub store: Arc<dyn CredentialStore>,
    /// Revoked access tokens and users.
    pub revocations: Arc<dyn RevocationList>,
    pub tokens: Arc<TokenService>,
    pub hasher: PasswordHasher,
    /// API configuration.
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn CredentialStore>,
        revocations: Arc<dyn RevocationList>,
    ) -> Self {
        let tokens = TokenService::new(
            config.jwt_secret.as_bytes(),
            &config.jwt_issuer,
            &config.jwt_audience,
            config.access_token_ttl_secs,
        );
        Self {
            store,
            revocations,
            tokens: Arc::new(tokens),
            hasher: PasswordHasher::new(config.bcrypt_cost),
            config: Arc::new(config),
        }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `bsm_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    bsm_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::GET_HEALTH, get(health::health_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_REFRESH_TOKEN, post(auth::refresh_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(
            routes::POST_AUTH_FORGOT_PASSWORD,
            post(auth::forgot_password_handler),
        )
        .route(
            routes::POST_AUTH_RESET_PASSWORD,
            post(auth::reset_password_handler),
        );

    // Protected routes (any authenticated, active user)
    let protected = Router::new()
        .route(routes::GET_AUTH_ME, get(auth::me_handler))
        .route(routes::POST_AUTH_LOGOUT_ALL, post(auth::logout_all_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    // Session administration
    let admin = Router::new()
        .route(
            routes::POST_AUTH_USERS_ID_REVOKE_SESSIONS,
            post(auth::revoke_sessions_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            RoleGuard::new(state.clone(), SESSION_ADMIN_ROLES),
            require_roles,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
