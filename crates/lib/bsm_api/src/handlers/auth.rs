//! Authentication request handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedRequest;
use crate::middleware::client_ip::ClientIp;
use crate::models::{
    AuthUser, ForgotPasswordRequest, LoginRequest, LoginResponse, LogoutRequest, MeResponse,
    MessageResponse, RefreshRequest, RefreshResponse, ResetPasswordRequest,
    RevokeSessionsResponse,
};
use crate::services::cookies::{
    REFRESH_COOKIE, access_cookie, clear_access_cookie, clear_refresh_cookie, refresh_cookie,
};
use crate::services::{auth, session};

/// Parse a required JSON body.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("invalid request body: {e}")))
}

/// Parse an optional JSON body; an empty body yields the default.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> AppResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

fn clear_auth_cookies(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(clear_access_cookie(secure))
        .add(clear_refresh_cookie(secure))
}

/// `POST /auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    ip: ClientIp,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let body: LoginRequest = parse_body(&body)?;
    let resp = auth::login(
        &state,
        &body.email,
        &body.password,
        body.remember,
        ip.as_deref(),
    )
    .await?;

    let config = &state.config;
    let jar = jar
        .add(access_cookie(
            &resp.access_token,
            config.access_token_ttl_secs,
            config.cookie_secure,
            body.remember,
        ))
        .add(refresh_cookie(
            &resp.refresh_token,
            config.refresh_token_ttl_days,
            config.cookie_secure,
            body.remember,
        ));
    Ok((jar, Json(resp)))
}

/// `POST /auth/refresh-token` (also `/auth/refresh`): exchange a refresh
/// token for a new pair. The token comes from the body, falling back to the
/// cookie. Cookies keep the persistence chosen at login.
pub async fn refresh_handler(
    State(state): State<AppState>,
    ip: ClientIp,
    jar: CookieJar,
    body: Bytes,
) -> AppResult<(CookieJar, Json<RefreshResponse>)> {
    let body: RefreshRequest = parse_optional_body(&body)?;
    let presented = body
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()))
        .ok_or_else(|| AppError::Validation("refresh token is required".into()))?;

    let auth::Refreshed {
        response,
        persistent,
    } = auth::refresh(&state, &presented, ip.as_deref()).await?;

    let config = &state.config;
    let jar = jar
        .add(access_cookie(
            &response.access_token,
            config.access_token_ttl_secs,
            config.cookie_secure,
            persistent,
        ))
        .add(refresh_cookie(
            &response.refresh_token,
            config.refresh_token_ttl_days,
            config.cookie_secure,
            persistent,
        ));
    Ok((jar, Json(response)))
}

/// `POST /auth/logout`: revoke presented credentials and clear cookies.
/// Always succeeds.
pub async fn logout_handler(
    State(state): State<AppState>,
    ip: ClientIp,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> (CookieJar, Json<MessageResponse>) {
    let body: LogoutRequest = parse_optional_body(&body).unwrap_or_else(|e| {
        debug!(error = %e, "ignoring unreadable logout body");
        LogoutRequest::default()
    });
    let access_token = session::locate_token(&headers, &state.config.internal_auth_header);
    let refresh_token = body
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .or_else(|| jar.get(REFRESH_COOKIE).map(|c| c.value().to_string()));

    let resp = auth::logout(
        &state,
        access_token.as_deref(),
        refresh_token.as_deref(),
        ip.as_deref(),
    )
    .await;
    (clear_auth_cookies(jar, state.config.cookie_secure), Json(resp))
}

/// `POST /auth/logout-all`: revoke every session of the caller.
pub async fn logout_all_handler(
    State(state): State<AppState>,
    session: AuthenticatedRequest,
    ip: ClientIp,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<RevokeSessionsResponse>)> {
    let resp = auth::logout_all(&state, &session, ip.as_deref()).await?;
    Ok((clear_auth_cookies(jar, state.config.cookie_secure), Json(resp)))
}

/// `GET /auth/me`: the resolved identity of the caller, both at the top
/// level and under `user`.
pub async fn me_handler(session: AuthenticatedRequest) -> Json<MeResponse> {
    let user: AuthUser = session.identity().clone().into();
    Json(MeResponse {
        success: true,
        identity: user.clone(),
        user,
    })
}

/// `POST /auth/users/{id}/revoke-sessions`: revoke every session of a user.
pub async fn revoke_sessions_handler(
    State(state): State<AppState>,
    session: AuthenticatedRequest,
    ip: ClientIp,
    Path(user_id): Path<String>,
) -> AppResult<Json<RevokeSessionsResponse>> {
    let user_id: i64 = user_id
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid user id: {user_id}")))?;
    debug!(by = session.user_id(), user_id, "revoking sessions");
    let resp =
        auth::revoke_user_sessions(&state, user_id, "revoked by administrator", ip.as_deref())
            .await?;
    Ok(Json(resp))
}

/// `POST /auth/forgot-password`: start a password reset. The reply does
/// not reveal whether the account exists.
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<MessageResponse>> {
    let body: ForgotPasswordRequest = parse_body(&body)?;
    if auth::forgot_password(&state, &body.email).await?.is_some() {
        debug!("password reset token ready for delivery");
    }
    Ok(Json(MessageResponse::ok(auth::FORGOT_PASSWORD_MESSAGE)))
}

/// `POST /auth/reset-password/{token}`: set a new password.
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Bytes,
) -> AppResult<Json<MessageResponse>> {
    let body: ResetPasswordRequest = parse_body(&body)?;
    let resp =
        auth::reset_password(&state, &token, &body.password, &body.confirm_password).await?;
    Ok(Json(resp))
}
