//! Credential store abstraction.
//!
//! The auth layer reads users and reads/writes refresh and reset token rows
//! through this trait. [`super::queries::PgCredentialStore`] is the
//! PostgreSQL implementation; [`super::memory::MemoryCredentialStore`] keeps
//! everything in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::AuthResult;
use crate::models::auth::{NewRefreshToken, NewUser, RefreshTokenRecord, User};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a user by email. Callers pass the normalised (trimmed,
    /// lower-cased) address.
    async fn find_user_by_email(&self, email: &str) -> AuthResult<Option<User>>;

    async fn find_user_by_id(&self, user_id: i64) -> AuthResult<Option<User>>;

    async fn create_user(&self, user: NewUser) -> AuthResult<User>;

    async fn admin_exists(&self) -> AuthResult<bool>;

    async fn touch_last_login(&self, user_id: i64, at: DateTime<Utc>) -> AuthResult<()>;

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> AuthResult<()>;

    async fn store_refresh_token(&self, token: NewRefreshToken)
    -> AuthResult<RefreshTokenRecord>;

    /// Find a non-revoked, unexpired refresh token by digest.
    async fn find_active_refresh_token(
        &self,
        token_hash: &str,
    ) -> AuthResult<Option<RefreshTokenRecord>>;

    /// Mark a refresh token revoked. Returns `false` when no unrevoked row
    /// matched, which is not an error.
    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<bool>;

    /// Revoke every outstanding refresh token of a user, returning the count.
    async fn revoke_all_refresh_tokens(
        &self,
        user_id: i64,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<u64>;

    async fn store_password_reset(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()>;

    /// Atomically mark an unused, unexpired reset token as used and return
    /// its owner.
    async fn consume_password_reset(&self, token_hash: &str) -> AuthResult<Option<i64>>;
}
