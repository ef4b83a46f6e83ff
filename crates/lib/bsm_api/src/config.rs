//! API server configuration.

use std::str::FromStr;

use bsm_core::auth::jwt::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_AUDIENCE, DEFAULT_ISSUER, resolve_jwt_secret,
};
use bsm_core::auth::password::DEFAULT_BCRYPT_COST;
use thiserror::Error;

/// Refresh token lifetime: 30 days.
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 30;

/// Password reset token lifetime: 1 hour.
pub const DEFAULT_PASSWORD_RESET_TTL_MINUTES: i64 = 60;

/// Header an upstream edge component uses to hand over the access token.
pub const DEFAULT_INTERNAL_AUTH_HEADER: &str = "x-internal-auth-token";

/// Interval between revocation list sweeps.
pub const DEFAULT_REVOCATION_SWEEP_SECS: u64 = 300;

/// Minimum accepted password length on reset.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Configuration errors reported at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Credentials for the admin created on first start.
#[derive(Clone, Debug)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// Upper bound on pooled database connections.
    pub max_connections: u32,
    /// JWT signing secret.
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_days: i64,
    pub password_reset_ttl_minutes: i64,
    /// Issue a new refresh token and revoke the presented one on every refresh.
    pub rotate_refresh_tokens: bool,
    /// Set the `Secure` attribute on auth cookies.
    pub cookie_secure: bool,
    /// Lower-case name of the trusted internal token header.
    pub internal_auth_header: String,
    pub bcrypt_cost: u32,
    pub revocation_sweep_secs: u64,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl ApiConfig {
    /// Defaults for everything except the signing secret. No environment
    /// access.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".into(),
            pg_connection_url: "postgres://localhost:5432/bsm".into(),
            max_connections: 10,
            jwt_secret: jwt_secret.into(),
            jwt_issuer: DEFAULT_ISSUER.into(),
            jwt_audience: DEFAULT_AUDIENCE.into(),
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
            password_reset_ttl_minutes: DEFAULT_PASSWORD_RESET_TTL_MINUTES,
            rotate_refresh_tokens: true,
            cookie_secure: false,
            internal_auth_header: DEFAULT_INTERNAL_AUTH_HEADER.into(),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            revocation_sweep_secs: DEFAULT_REVOCATION_SWEEP_SECS,
            bootstrap_admin: None,
        }
    }

    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                      | Default                           |
    /// |-------------------------------|-----------------------------------|
    /// | `BIND_ADDR`                   | `127.0.0.1:3100`                  |
    /// | `DATABASE_URL`                | `postgres://localhost:5432/bsm`   |
    /// | `DATABASE_MAX_CONNECTIONS`    | `10`                              |
    /// | `JWT_SECRET` / `AUTH_SECRET`  | generated & persisted (dev only)  |
    /// | `JWT_ISSUER` / `JWT_AUDIENCE` | `bsm-api` / `bsm-app`             |
    /// | `ACCESS_TOKEN_TTL_SECS`       | `86400`                           |
    /// | `REFRESH_TOKEN_TTL_DAYS`      | `30`                              |
    /// | `PASSWORD_RESET_TTL_MINUTES`  | `60`                              |
    /// | `ROTATE_REFRESH_TOKENS`       | `true`                            |
    /// | `COOKIE_SECURE`               | `true` iff `APP_ENV=production`   |
    /// | `INTERNAL_AUTH_HEADER`        | `x-internal-auth-token`           |
    /// | `BCRYPT_COST`                 | `10`                              |
    /// | `REVOCATION_SWEEP_SECS`       | `300`                             |
    /// | `BOOTSTRAP_ADMIN_EMAIL`/`_PASSWORD` | unset                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), resolve_jwt_secret)
    }

    /// Build from an arbitrary variable lookup. `secret` is only called when
    /// neither `JWT_SECRET` nor `AUTH_SECRET` is provided.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        secret: impl FnOnce() -> String,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("JWT_SECRET")
            .or_else(|| get("AUTH_SECRET"))
            .unwrap_or_else(secret);
        let mut config = Self::new(jwt_secret);

        if let Some(v) = get("BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = get("DATABASE_URL") {
            config.pg_connection_url = v;
        }
        if let Some(v) = get("JWT_ISSUER") {
            config.jwt_issuer = v;
        }
        if let Some(v) = get("JWT_AUDIENCE") {
            config.jwt_audience = v;
        }
        if let Some(v) = get("INTERNAL_AUTH_HEADER") {
            config.internal_auth_header = v.trim().to_ascii_lowercase();
        }

        config.max_connections =
            parse_or("DATABASE_MAX_CONNECTIONS", get("DATABASE_MAX_CONNECTIONS"), config.max_connections)?;
        config.access_token_ttl_secs =
            parse_or("ACCESS_TOKEN_TTL_SECS", get("ACCESS_TOKEN_TTL_SECS"), config.access_token_ttl_secs)?;
        config.refresh_token_ttl_days = parse_or(
            "REFRESH_TOKEN_TTL_DAYS",
            get("REFRESH_TOKEN_TTL_DAYS"),
            config.refresh_token_ttl_days,
        )?;
        config.password_reset_ttl_minutes = parse_or(
            "PASSWORD_RESET_TTL_MINUTES",
            get("PASSWORD_RESET_TTL_MINUTES"),
            config.password_reset_ttl_minutes,
        )?;
        config.bcrypt_cost = parse_or("BCRYPT_COST", get("BCRYPT_COST"), config.bcrypt_cost)?;
        config.revocation_sweep_secs = parse_or(
            "REVOCATION_SWEEP_SECS",
            get("REVOCATION_SWEEP_SECS"),
            config.revocation_sweep_secs,
        )?;
        config.rotate_refresh_tokens = parse_bool_or(
            "ROTATE_REFRESH_TOKENS",
            get("ROTATE_REFRESH_TOKENS"),
            config.rotate_refresh_tokens,
        )?;

        let production = get("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production"));
        config.cookie_secure = parse_bool_or("COOKIE_SECURE", get("COOKIE_SECURE"), production)?;

        for (key, value) in [
            ("ACCESS_TOKEN_TTL_SECS", config.access_token_ttl_secs),
            ("REFRESH_TOKEN_TTL_DAYS", config.refresh_token_ttl_days),
            ("PASSWORD_RESET_TTL_MINUTES", config.password_reset_ttl_minutes),
        ] {
            if value <= 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: value.to_string(),
                });
            }
        }

        config.bootstrap_admin = match (get("BOOTSTRAP_ADMIN_EMAIL"), get("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            _ => None,
        };

        Ok(config)
    }
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

fn parse_bool_or(key: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value }),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ApiConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|k| map.get(k).cloned(), || "fallback".to_string())
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = load(&[]).unwrap();
        assert_eq!(config.jwt_secret, "fallback");
        assert_eq!(config.access_token_ttl_secs, DEFAULT_ACCESS_TOKEN_TTL_SECS);
        assert_eq!(config.refresh_token_ttl_days, 30);
        assert!(config.rotate_refresh_tokens);
        assert!(!config.cookie_secure);
        assert_eq!(config.internal_auth_header, DEFAULT_INTERNAL_AUTH_HEADER);
        assert!(config.bootstrap_admin.is_none());
    }

    #[test]
    fn jwt_secret_takes_precedence_over_auth_secret() {
        let config = load(&[("JWT_SECRET", "a"), ("AUTH_SECRET", "b")]).unwrap();
        assert_eq!(config.jwt_secret, "a");
        let config = load(&[("AUTH_SECRET", "b")]).unwrap();
        assert_eq!(config.jwt_secret, "b");
    }

    #[test]
    fn production_turns_on_secure_cookies() {
        let config = load(&[("APP_ENV", "production")]).unwrap();
        assert!(config.cookie_secure);
        let config = load(&[("APP_ENV", "production"), ("COOKIE_SECURE", "false")]).unwrap();
        assert!(!config.cookie_secure);
    }

    #[test]
    fn numeric_overrides_are_parsed() {
        let config = load(&[
            ("ACCESS_TOKEN_TTL_SECS", "900"),
            ("REFRESH_TOKEN_TTL_DAYS", "7"),
            ("ROTATE_REFRESH_TOKENS", "no"),
            ("INTERNAL_AUTH_HEADER", "X-Edge-Token"),
        ])
        .unwrap();
        assert_eq!(config.access_token_ttl_secs, 900);
        assert_eq!(config.refresh_token_ttl_days, 7);
        assert!(!config.rotate_refresh_tokens);
        assert_eq!(config.internal_auth_header, "x-edge-token");
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = load(&[("BCRYPT_COST", "ten")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "BCRYPT_COST", .. }));
        let err = load(&[("ACCESS_TOKEN_TTL_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "ACCESS_TOKEN_TTL_SECS", .. }));
        assert!(load(&[("COOKIE_SECURE", "maybe")]).is_err());
    }

    #[test]
    fn bootstrap_admin_needs_both_values() {
        assert!(load(&[("BOOTSTRAP_ADMIN_EMAIL", "a@b.c")]).unwrap().bootstrap_admin.is_none());
        let config = load(&[
            ("BOOTSTRAP_ADMIN_EMAIL", "a@b.c"),
            ("BOOTSTRAP_ADMIN_PASSWORD", "secret123"),
        ])
        .unwrap();
        assert_eq!(config.bootstrap_admin.unwrap().email, "a@b.c");
    }
}
