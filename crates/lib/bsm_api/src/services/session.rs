//! Session resolution: the single path from an inbound request to an
//! authenticated identity.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::CookieJar;
use bsm_core::auth::AuthError;
use bsm_core::auth::jwt::VerifiedToken;
use bsm_core::auth::revocation::RevocationKey;
use bsm_core::models::auth::Role;
use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::AppState;
use crate::middleware::auth::AuthenticatedRequest;
use crate::services::cookies::ACCESS_COOKIE;

/// Find a candidate access token: trusted internal header, then the
/// `auth_token` cookie, then `Authorization: Bearer`.
pub fn locate_token(headers: &HeaderMap, internal_header: &str) -> Option<String> {
    let non_empty = |v: &str| {
        let v = v.trim();
        (!v.is_empty()).then(|| v.to_string())
    };

    if let Some(token) = headers
        .get(internal_header)
        .and_then(|v| v.to_str().ok())
        .and_then(non_empty)
    {
        return Some(token);
    }

    if let Some(token) = CookieJar::from_headers(headers)
        .get(ACCESS_COOKIE)
        .and_then(|c| non_empty(c.value()))
    {
        return Some(token);
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .and_then(non_empty)
}

fn store_failure(e: AuthError) -> AuthError {
    warn!(error = %e, "session store failure, rejecting request");
    match e {
        AuthError::SessionStore(_) => e,
        other => AuthError::SessionStore(other.to_string()),
    }
}

/// Resolve the caller of a request.
///
/// Order: locate token, raw-token revocation, signature and claims, `jti`
/// and user-level revocation, live user record, optional role gate. The
/// identity always carries the stored role, never the claim's.
pub async fn resolve_session(
    state: &AppState,
    headers: &HeaderMap,
    required_roles: Option<&[Role]>,
) -> Result<AuthenticatedRequest, AuthError> {
    let token = locate_token(headers, &state.config.internal_auth_header)
        .ok_or(AuthError::MissingToken)?;

    if state
        .revocations
        .is_revoked(&RevocationKey::raw_token(&token))
        .await
        .map_err(store_failure)?
    {
        debug!("rejected revoked raw token");
        return Err(AuthError::TokenRevoked);
    }

    let verified = state.tokens.verify_access_token(&token)?;
    check_revoked(state, &verified).await?;

    let user_id = verified.user_id;
    let horizon = Utc::now() + Duration::seconds(state.tokens.access_ttl_secs());
    let user = state
        .store
        .find_user_by_id(user_id)
        .await
        .map_err(store_failure)?;

    let user = match user {
        Some(user) => user,
        None => {
            warn!(user_id, "token subject no longer exists");
            if let Err(e) = state
                .revocations
                .revoke_user(user_id, horizon, "user not found")
                .await
            {
                warn!(user_id, error = %e, "failed to revoke missing user");
            }
            return Err(AuthError::UnknownSubject);
        }
    };

    if !user.is_active() {
        warn!(user_id, "token presented for inactive account");
        if let Err(e) = state
            .revocations
            .revoke_user(user_id, horizon, "account not active")
            .await
        {
            warn!(user_id, error = %e, "failed to revoke inactive user");
        }
        return Err(AuthError::AccountInactive);
    }

    let identity = user.identity();
    if let Some(roles) = required_roles
        && !roles.contains(&identity.role)
    {
        debug!(user_id, role = %identity.role, "role not permitted");
        return Err(AuthError::InsufficientPermissions);
    }

    Ok(AuthenticatedRequest::new(
        identity,
        verified.claims.jti.clone(),
        verified.expires_at(),
    ))
}

/// Reject a verified token whose `jti` is revoked, or whose user was
/// revoked at or after the token's issuance.
async fn check_revoked(state: &AppState, verified: &VerifiedToken) -> Result<(), AuthError> {
    if !verified.claims.jti.is_empty()
        && state
            .revocations
            .is_revoked(&RevocationKey::TokenId(verified.claims.jti.clone()))
            .await
            .map_err(store_failure)?
    {
        debug!(user_id = verified.user_id, "rejected revoked token id");
        return Err(AuthError::TokenRevoked);
    }

    if let Some(entry) = state
        .revocations
        .lookup(&RevocationKey::User(verified.user_id))
        .await
        .map_err(store_failure)?
        && verified.issued_at() <= entry.revoked_at
    {
        debug!(
            user_id = verified.user_id,
            reason = %entry.reason,
            "rejected token of revoked user"
        );
        return Err(AuthError::TokenRevoked);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::http::header::COOKIE;

    const INTERNAL: &str = "x-internal-auth-token";

    #[test]
    fn no_carrier_means_no_token() {
        assert_eq!(locate_token(&HeaderMap::new(), INTERNAL), None);
    }

    #[test]
    fn bearer_header_is_read() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(locate_token(&headers, INTERNAL).as_deref(), Some("abc"));
    }

    #[test]
    fn non_bearer_scheme_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(locate_token(&headers, INTERNAL), None);
    }

    #[test]
    fn cookie_beats_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; auth_token=from-cookie"));
        assert_eq!(
            locate_token(&headers, INTERNAL).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn internal_header_beats_everything() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        headers.insert(COOKIE, HeaderValue::from_static("auth_token=from-cookie"));
        headers.insert(INTERNAL, HeaderValue::from_static("from-edge"));
        assert_eq!(locate_token(&headers, INTERNAL).as_deref(), Some("from-edge"));
    }

    #[test]
    fn empty_carriers_fall_through() {
        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL, HeaderValue::from_static(""));
        headers.insert(COOKIE, HeaderValue::from_static("auth_token="));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer last"));
        assert_eq!(locate_token(&headers, INTERNAL).as_deref(), Some("last"));
    }
}
