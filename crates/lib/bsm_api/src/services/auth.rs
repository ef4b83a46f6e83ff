//! Authentication service: login, refresh, logout and password reset flows
//! over the credential store, token service and revocation list.

use std::sync::OnceLock;

use bsm_core::auth::AuthError;
use bsm_core::auth::opaque::{digest_token, generate_token};
use bsm_core::auth::revocation::RevocationKey;
use bsm_core::models::auth::{NewRefreshToken, NewUser, Role, User, UserStatus};
use chrono::{Duration, TimeZone, Utc};
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::config::MIN_PASSWORD_LENGTH;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedRequest;
use crate::models::{
    LoginResponse, MessageResponse, RefreshResponse, RevokeSessionsResponse,
};

const TOKEN_TYPE: &str = "Bearer";

/// Reply to every forgot-password request, whether or not the email exists.
pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent";

/// Trim and lower-case an email for lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Hash checked against when the email is unknown, so both failure paths
/// pay for one bcrypt verification.
fn dummy_hash(state: &AppState) -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| {
        state
            .hasher
            .hash("bsm-dummy-password")
            .unwrap_or_default()
    })
}

/// Where a user-level revocation stops mattering: every token issued before
/// now has expired by then.
fn user_revocation_horizon(state: &AppState) -> chrono::DateTime<Utc> {
    Utc::now() + Duration::seconds(state.tokens.access_ttl_secs())
}

/// Issue and persist a refresh token. Returns the plaintext.
async fn issue_refresh_token(
    state: &AppState,
    user_id: i64,
    client_ip: Option<&str>,
    persistent: bool,
) -> AppResult<String> {
    let token = generate_token();
    let expires_at = Utc::now() + Duration::days(state.config.refresh_token_ttl_days);
    state
        .store
        .store_refresh_token(NewRefreshToken {
            token_hash: digest_token(&token),
            user_id,
            expires_at,
            created_by_ip: client_ip.map(str::to_string),
            persistent,
        })
        .await?;
    Ok(token)
}

/// Authenticate with email + password.
///
/// Unknown email, inactive account and wrong password all yield the same
/// error. Once the password is verified only access token signing can fail
/// the login; refresh token persistence and the last-login update are logged.
/// `remember` is recorded on the refresh token and carried across refreshes.
pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
    remember: bool,
    client_ip: Option<&str>,
) -> AppResult<LoginResponse> {
    let email = normalize_email(email);
    if email.is_empty() || password.is_empty() {
        return Err(AppError::Validation(
            "email and password are required".into(),
        ));
    }

    let user = state.store.find_user_by_email(&email).await?;

    let user = match user {
        Some(user) if user.is_active() => user,
        other => {
            state.hasher.verify(password, dummy_hash(state));
            debug!(
                email = %email,
                known = other.is_some(),
                "login rejected before password check"
            );
            return Err(AuthError::InvalidCredentials.into());
        }
    };

    if !state.hasher.verify(password, &user.password_hash) {
        debug!(user_id = user.id, "login rejected: wrong password");
        return Err(AuthError::InvalidCredentials.into());
    }

    let access = state.tokens.issue_access_token(&user)?;

    let refresh_token = match issue_refresh_token(state, user.id, client_ip, remember).await {
        Ok(token) => token,
        Err(e) => {
            error!(user_id = user.id, error = %e, "failed to persist refresh token at login");
            generate_token()
        }
    };

    if let Err(e) = state.store.touch_last_login(user.id, Utc::now()).await {
        warn!(user_id = user.id, error = %e, "failed to update last login");
    }

    info!(user_id = user.id, role = %user.role, "user logged in");

    Ok(LoginResponse {
        success: true,
        access_token: access.token,
        refresh_token,
        expires_in: access.expires_in,
        token_type: TOKEN_TYPE.to_string(),
        user: user.identity().into(),
    })
}

/// Outcome of a successful refresh.
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub response: RefreshResponse,
    /// Whether the session was opened with "remember me".
    pub persistent: bool,
}

/// Exchange a refresh token for a new access token.
///
/// With rotation enabled a new token is persisted first and the presented
/// one is then revoked; otherwise the presented token is returned unchanged.
pub async fn refresh(
    state: &AppState,
    presented: &str,
    client_ip: Option<&str>,
) -> AppResult<Refreshed> {
    let presented = presented.trim();
    if presented.is_empty() {
        return Err(AppError::Validation("refresh token is required".into()));
    }
    let token_hash = digest_token(presented);

    let record = state
        .store
        .find_active_refresh_token(&token_hash)
        .await?
        .ok_or(AuthError::InvalidRefreshToken)?;

    let user = state.store.find_user_by_id(record.user_id).await?;
    let user = match user {
        Some(user) if user.is_active() => user,
        _ => {
            warn!(user_id = record.user_id, "refresh for missing or inactive user");
            if let Err(e) = state.store.revoke_refresh_token(&token_hash, client_ip).await {
                warn!(user_id = record.user_id, error = %e, "failed to revoke refresh token");
            }
            return Err(AuthError::InvalidRefreshToken.into());
        }
    };

    let refresh_token = if state.config.rotate_refresh_tokens {
        let rotated = issue_refresh_token(state, user.id, client_ip, record.persistent).await?;
        // Losing the race to another refresh with the same token means the
        // token was already spent.
        if !state
            .store
            .revoke_refresh_token(&token_hash, client_ip)
            .await?
        {
            warn!(user_id = user.id, "refresh token reused concurrently");
            if let Err(e) = state
                .store
                .revoke_refresh_token(&digest_token(&rotated), client_ip)
                .await
            {
                warn!(user_id = user.id, error = %e, "failed to revoke unused rotated token");
            }
            return Err(AuthError::InvalidRefreshToken.into());
        }
        rotated
    } else {
        presented.to_string()
    };

    let access = state.tokens.issue_access_token(&user)?;
    debug!(user_id = user.id, rotated = state.config.rotate_refresh_tokens, "token refreshed");

    Ok(Refreshed {
        response: RefreshResponse {
            success: true,
            access_token: access.token,
            refresh_token,
            expires_in: access.expires_in,
            token_type: TOKEN_TYPE.to_string(),
        },
        persistent: record.persistent,
    })
}

/// Revoke whatever credentials were presented. Never fails.
pub async fn logout(
    state: &AppState,
    access_token: Option<&str>,
    refresh_token: Option<&str>,
    client_ip: Option<&str>,
) -> MessageResponse {
    if let Some(token) = access_token.map(str::trim).filter(|t| !t.is_empty()) {
        revoke_access_token(state, token).await;
    }

    if let Some(token) = refresh_token.map(str::trim).filter(|t| !t.is_empty()) {
        match state
            .store
            .revoke_refresh_token(&digest_token(token), client_ip)
            .await
        {
            Ok(true) => debug!("refresh token revoked at logout"),
            Ok(false) => debug!("refresh token at logout was unknown or already revoked"),
            Err(e) => warn!(error = %e, "failed to revoke refresh token at logout"),
        }
    }

    MessageResponse::ok("Logged out successfully")
}

/// Blacklist an access token until it would expire. Tokens that decode are
/// keyed by `jti`; anything else by digest for one access lifetime.
async fn revoke_access_token(state: &AppState, token: &str) {
    let now = Utc::now();
    let (key, expires_at) = match state.tokens.decode_ignoring_expiry(token) {
        Some(claims) if !claims.jti.is_empty() => {
            let exp = Utc.timestamp_opt(claims.exp, 0).single();
            match exp {
                Some(exp) if exp > now => (RevocationKey::TokenId(claims.jti), exp),
                _ => {
                    debug!("access token at logout already expired");
                    return;
                }
            }
        }
        _ => (
            RevocationKey::raw_token(token),
            user_revocation_horizon(state),
        ),
    };
    if let Err(e) = state.revocations.revoke(key, expires_at, "logout").await {
        warn!(error = %e, "failed to revoke access token at logout");
    }
}

/// Revoke every session of a user: all refresh tokens, and every access
/// token issued so far.
pub async fn revoke_user_sessions(
    state: &AppState,
    user_id: i64,
    reason: &str,
    client_ip: Option<&str>,
) -> AppResult<RevokeSessionsResponse> {
    if state.store.find_user_by_id(user_id).await?.is_none() {
        return Err(AppError::NotFound(format!("user {user_id}")));
    }
    let revoked = state
        .store
        .revoke_all_refresh_tokens(user_id, client_ip)
        .await?;
    state
        .revocations
        .revoke_user(user_id, user_revocation_horizon(state), reason)
        .await?;
    info!(user_id, revoked, reason, "user sessions revoked");
    Ok(RevokeSessionsResponse {
        success: true,
        user_id,
        revoked_refresh_tokens: revoked,
    })
}

/// Log the caller out everywhere.
pub async fn logout_all(
    state: &AppState,
    session: &AuthenticatedRequest,
    client_ip: Option<&str>,
) -> AppResult<RevokeSessionsResponse> {
    revoke_user_sessions(state, session.user_id(), "logout all", client_ip).await
}

/// Create a password reset token for an active account.
///
/// Returns the plaintext token when one was created; callers must respond
/// identically either way. Store failures are logged and reported as "no
/// token" so they cannot tell accounts apart. Delivery is the caller's
/// concern.
pub async fn forgot_password(state: &AppState, email: &str) -> AppResult<Option<String>> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(AppError::Validation("email is required".into()));
    }

    let user = match state.store.find_user_by_email(&email).await {
        Ok(Some(user)) if user.is_active() => user,
        Ok(_) => {
            debug!(email = %email, "password reset requested for unknown or inactive account");
            return Ok(None);
        }
        Err(e) => {
            error!(error = %e, "password reset lookup failed");
            return Ok(None);
        }
    };

    let token = generate_token();
    let expires_at = Utc::now() + Duration::minutes(state.config.password_reset_ttl_minutes);
    if let Err(e) = state
        .store
        .store_password_reset(user.id, &digest_token(&token), expires_at)
        .await
    {
        error!(user_id = user.id, error = %e, "failed to store password reset token");
        return Ok(None);
    }
    info!(user_id = user.id, %expires_at, "password reset token issued");
    Ok(Some(token))
}

/// Set a new password with a reset token, then revoke all sessions.
pub async fn reset_password(
    state: &AppState,
    token: &str,
    password: &str,
    confirm_password: &str,
) -> AppResult<MessageResponse> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if password != confirm_password {
        return Err(AppError::Validation("Passwords do not match".into()));
    }

    let user_id = state
        .store
        .consume_password_reset(&digest_token(token.trim()))
        .await?
        .ok_or(AuthError::InvalidResetToken)?;

    let hash = state.hasher.hash(password)?;
    state.store.update_password_hash(user_id, &hash).await?;

    if let Err(e) = revoke_user_sessions(state, user_id, "password reset", None).await {
        warn!(user_id, error = %e, "failed to revoke sessions after password reset");
    }

    info!(user_id, "password reset");
    Ok(MessageResponse::ok("Password has been reset"))
}

/// Create the first admin unless an active admin already exists.
pub async fn bootstrap_admin(
    state: &AppState,
    email: &str,
    password: &str,
) -> AppResult<Option<User>> {
    if state.store.admin_exists().await? {
        return Ok(None);
    }
    let email = normalize_email(email);
    if email.is_empty() || password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(format!(
            "bootstrap admin needs an email and a password of at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    let user = state
        .store
        .create_user(NewUser {
            name: "Administrator".into(),
            email,
            password_hash: state.hasher.hash(password)?,
            role: Role::Admin,
            status: UserStatus::Active,
        })
        .await?;
    info!(user_id = user.id, email = %user.email, "bootstrap admin created");
    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Admin@Example.COM "), "admin@example.com");
    }
}
