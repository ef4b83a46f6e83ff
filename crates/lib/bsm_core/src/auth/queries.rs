//! PostgreSQL credential store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::store::CredentialStore;
use super::{AuthError, AuthResult};
use crate::models::auth::{NewRefreshToken, NewUser, RefreshTokenRecord, User};

const USER_COLUMNS: &str = "id, email, name, password_hash, role, status, \
     last_login_at, created_at, updated_at";

const REFRESH_COLUMNS: &str = "id, user_id, token_hash, expires_at, revoked, revoked_at, \
     revoked_by_ip, created_at, created_by_ip, persistent";

/// Row shape of `users`; role and status are stored as checked text.
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    email: String,
    name: String,
    password_hash: String,
    role: String,
    status: String,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AuthError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            password_hash: row.password_hash,
            role: row
                .role
                .parse()
                .map_err(|e| AuthError::Internal(format!("user {}: {e}", row.id)))?,
            status: row
                .status
                .parse()
                .map_err(|e| AuthError::Internal(format!("user {}: {e}", row.id)))?,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RefreshRow {
    id: Uuid,
    user_id: i64,
    token_hash: String,
    expires_at: DateTime<Utc>,
    revoked: bool,
    revoked_at: Option<DateTime<Utc>>,
    revoked_by_ip: Option<String>,
    created_at: DateTime<Utc>,
    created_by_ip: Option<String>,
    persistent: bool,
}

impl From<RefreshRow> for RefreshTokenRecord {
    fn from(row: RefreshRow) -> Self {
        RefreshTokenRecord {
            id: row.id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            revoked: row.revoked,
            revoked_at: row.revoked_at,
            revoked_by_ip: row.revoked_by_ip,
            created_at: row.created_at,
            created_by_ip: row.created_by_ip,
            persistent: row.persistent,
        }
    }
}

/// Credential store over a bounded `PgPool`. Every method is a single
/// statement.
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_user_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_id(&self, user_id: i64) -> AuthResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn create_user(&self, user: NewUser) -> AuthResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (email, name, password_hash, role, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .fetch_one(&self.pool)
        .await?;
        User::try_from(row)
    }

    async fn admin_exists(&self) -> AuthResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE role = 'admin' AND status = 'active')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn touch_last_login(&self, user_id: i64, at: DateTime<Utc>) -> AuthResult<()> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> AuthResult<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn store_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> AuthResult<RefreshTokenRecord> {
        let row = sqlx::query_as::<_, RefreshRow>(&format!(
            "INSERT INTO refresh_tokens \
             (id, token_hash, user_id, expires_at, created_by_ip, persistent) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {REFRESH_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(token.expires_at)
        .bind(token.created_by_ip.as_deref())
        .bind(token.persistent)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn find_active_refresh_token(
        &self,
        token_hash: &str,
    ) -> AuthResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, RefreshRow>(&format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens \
             WHERE token_hash = $1 AND NOT revoked AND expires_at > now()"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<bool> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = now(), revoked_by_ip = $2 \
             WHERE token_hash = $1 AND NOT revoked",
        )
        .bind(token_hash)
        .bind(revoked_by_ip)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_refresh_tokens(
        &self,
        user_id: i64,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE, revoked_at = now(), revoked_by_ip = $2 \
             WHERE user_id = $1 AND NOT revoked",
        )
        .bind(user_id)
        .bind(revoked_by_ip)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn store_password_reset(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()> {
        sqlx::query(
            "INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_password_reset(&self, token_hash: &str) -> AuthResult<Option<i64>> {
        let user_id = sqlx::query_scalar::<_, i64>(
            "UPDATE password_reset_tokens SET used_at = now() \
             WHERE token_hash = $1 AND used_at IS NULL AND expires_at > now() \
             RETURNING user_id",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id)
    }
}
