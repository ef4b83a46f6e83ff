//! JWT access token issuance and verification.

use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{debug, warn};
use uuid::Uuid;

use super::AuthError;
use crate::models::auth::{TokenClaims, User};

/// Access token lifetime: 24 hours.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Default `iss` claim.
pub const DEFAULT_ISSUER: &str = "bsm-api";

/// Default `aud` claim.
pub const DEFAULT_AUDIENCE: &str = "bsm-app";

/// Clock skew tolerated when checking `exp`.
const LEEWAY_SECS: u64 = 5;

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

/// Claims that passed signature, expiry, issuer and audience checks.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub user_id: i64,
    pub claims: TokenClaims,
}

impl VerifiedToken {
    /// Issuance time. Taken from the time-ordered `jti` when present, since
    /// `iat` only has whole-second precision.
    pub fn issued_at(&self) -> DateTime<Utc> {
        Uuid::parse_str(&self.claims.jti)
            .ok()
            .and_then(|id| id.get_timestamp())
            .and_then(|ts| {
                let (secs, nanos) = ts.to_unix();
                Utc.timestamp_opt(i64::try_from(secs).ok()?, nanos).single()
            })
            .unwrap_or_else(|| timestamp(self.claims.iat))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        timestamp(self.claims.exp)
    }
}

/// Signs and verifies HS256 access tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl_secs: i64,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl_secs", &self.access_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &[u8], issuer: &str, audience: &str, access_ttl_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            access_ttl_secs,
        }
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl_secs
    }

    /// Sign an access token for `user` with a fresh time-ordered `jti`.
    pub fn issue_access_token(&self, user: &User) -> Result<IssuedAccessToken, AuthError> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.access_ttl_secs);
        let jti = Uuid::now_v7().to_string();
        let claims = TokenClaims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: jti.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        Ok(IssuedAccessToken {
            token,
            jti,
            expires_at,
            expires_in: self.access_ttl_secs,
        })
    }

    /// Verify signature, expiry, issuer and audience, then require a numeric
    /// subject.
    pub fn verify_access_token(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let claims = decode::<TokenClaims>(token, &self.decoding, &self.validation(true))
            .map_err(|e| {
                debug!(error = %e, "access token rejected");
                AuthError::InvalidToken
            })?
            .claims;
        let user_id = claims
            .sub
            .parse::<i64>()
            .map_err(|_| AuthError::MalformedToken)?;
        Ok(VerifiedToken { user_id, claims })
    }

    /// Decode a token whose signature is ours without enforcing `exp`.
    ///
    /// Used by logout, which must still revoke a token that is about to
    /// expire and should treat an expired one as already dead.
    pub fn decode_ignoring_expiry(&self, token: &str) -> Option<TokenClaims> {
        decode::<TokenClaims>(token, &self.decoding, &self.validation(false))
            .ok()
            .map(|data| data.claims)
    }

    fn validation(&self, check_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = check_exp;
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Resolve the JWT secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
///
/// The persisted fallback is meant for local development only and is logged
/// as a warning whenever it is used.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    if let Ok(secret) = std::env::var("AUTH_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    let secret_path = jwt_secret_path();
    warn!(
        path = %secret_path.display(),
        "JWT_SECRET is not set; using development fallback secret"
    );
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(&secret_path, &secret) {
        warn!(error = %e, "could not persist development JWT secret");
    }
    secret
}

/// Path to the persisted development JWT secret.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bsm")
        .join("jwt-secret")
}
