//! In-process credential store.
//!
//! Backs the HTTP tests and database-less local runs. Semantics match
//! [`super::queries::PgCredentialStore`], including case-insensitive email
//! lookup and single-use reset tokens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::CredentialStore;
use super::{AuthError, AuthResult};
use crate::models::auth::{
    NewRefreshToken, NewUser, PasswordResetRecord, RefreshTokenRecord, Role, User, UserStatus,
};

#[derive(Debug, Default)]
struct Inner {
    next_user_id: i64,
    users: HashMap<i64, User>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    password_resets: HashMap<String, PasswordResetRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn set_status(&self, user_id: i64, status: UserStatus) {
        if let Some(user) = self.inner.write().await.users.get_mut(&user_id) {
            user.status = status;
            user.updated_at = Utc::now();
        }
    }

    pub async fn set_role(&self, user_id: i64, role: Role) {
        if let Some(user) = self.inner.write().await.users.get_mut(&user_id) {
            user.role = role;
            user.updated_at = Utc::now();
        }
    }

    /// Drop a user and their tokens, as an out-of-band deletion would.
    pub async fn delete_user(&self, user_id: i64) {
        let mut inner = self.inner.write().await;
        inner.users.remove(&user_id);
        inner.refresh_tokens.retain(|_, t| t.user_id != user_id);
        inner.password_resets.retain(|_, r| r.user_id != user_id);
    }

    /// All refresh token rows of a user, revoked ones included.
    pub async fn refresh_tokens_for(&self, user_id: i64) -> Vec<RefreshTokenRecord> {
        let inner = self.inner.read().await;
        let mut tokens: Vec<_> = inner
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        tokens
    }

    /// Refresh token row by digest, revoked or not.
    pub async fn refresh_token(&self, token_hash: &str) -> Option<RefreshTokenRecord> {
        self.inner
            .read()
            .await
            .refresh_tokens
            .get(token_hash)
            .cloned()
    }

    /// Rewrite a refresh token's expiry.
    pub async fn set_refresh_expiry(&self, token_hash: &str, expires_at: DateTime<Utc>) {
        if let Some(token) = self.inner.write().await.refresh_tokens.get_mut(token_hash) {
            token.expires_at = expires_at;
        }
    }

    fn check_available(&self) -> AuthResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::Internal("credential store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_user_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.email.to_lowercase() == email)
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: i64) -> AuthResult<Option<User>> {
        self.check_available()?;
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> AuthResult<User> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        let email = user.email.to_lowercase();
        if inner.users.values().any(|u| u.email.to_lowercase() == email) {
            return Err(AuthError::ValidationError(format!(
                "email already registered: {email}"
            )));
        }
        inner.next_user_id += 1;
        let now = Utc::now();
        let record = User {
            id: inner.next_user_id,
            email: user.email,
            name: user.name,
            password_hash: user.password_hash,
            role: user.role,
            status: user.status,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn admin_exists(&self) -> AuthResult<bool> {
        self.check_available()?;
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .any(|u| u.role == Role::Admin && u.is_active()))
    }

    async fn touch_last_login(&self, user_id: i64, at: DateTime<Utc>) -> AuthResult<()> {
        self.check_available()?;
        if let Some(user) = self.inner.write().await.users.get_mut(&user_id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn update_password_hash(&self, user_id: i64, password_hash: &str) -> AuthResult<()> {
        self.check_available()?;
        if let Some(user) = self.inner.write().await.users.get_mut(&user_id) {
            user.password_hash = password_hash.to_string();
            user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn store_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> AuthResult<RefreshTokenRecord> {
        self.check_available()?;
        let record = RefreshTokenRecord {
            id: Uuid::now_v7(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            revoked: false,
            revoked_at: None,
            revoked_by_ip: None,
            created_at: Utc::now(),
            created_by_ip: token.created_by_ip,
            persistent: token.persistent,
        };
        self.inner
            .write()
            .await
            .refresh_tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(record)
    }

    async fn find_active_refresh_token(
        &self,
        token_hash: &str,
    ) -> AuthResult<Option<RefreshTokenRecord>> {
        self.check_available()?;
        let now = Utc::now();
        Ok(self
            .inner
            .read()
            .await
            .refresh_tokens
            .get(token_hash)
            .filter(|t| t.is_usable(now))
            .cloned())
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<bool> {
        self.check_available()?;
        let mut inner = self.inner.write().await;
        match inner.refresh_tokens.get_mut(token_hash) {
            Some(token) if !token.revoked => {
                token.revoked = true;
                token.revoked_at = Some(Utc::now());
                token.revoked_by_ip = revoked_by_ip.map(str::to_string);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_refresh_tokens(
        &self,
        user_id: i64,
        revoked_by_ip: Option<&str>,
    ) -> AuthResult<u64> {
        self.check_available()?;
        let now = Utc::now();
        let mut count = 0;
        let mut inner = self.inner.write().await;
        for token in inner
            .refresh_tokens
            .values_mut()
            .filter(|t| t.user_id == user_id && !t.revoked)
        {
            token.revoked = true;
            token.revoked_at = Some(now);
            token.revoked_by_ip = revoked_by_ip.map(str::to_string);
            count += 1;
        }
        Ok(count)
    }

    async fn store_password_reset(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<()> {
        self.check_available()?;
        let record = PasswordResetRecord {
            id: Uuid::now_v7(),
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            used_at: None,
            created_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .password_resets
            .insert(token_hash.to_string(), record);
        Ok(())
    }

    async fn consume_password_reset(&self, token_hash: &str) -> AuthResult<Option<i64>> {
        self.check_available()?;
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        match inner.password_resets.get_mut(token_hash) {
            Some(reset) if reset.used_at.is_none() && reset.expires_at > now => {
                reset.used_at = Some(now);
                Ok(Some(reset.user_id))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.into(),
            name: "Test".into(),
            password_hash: "hash".into(),
            role,
            status: UserStatus::Active,
        }
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let store = MemoryCredentialStore::new();
        let user = store
            .create_user(new_user("Ada@Example.com", Role::Employee))
            .await
            .unwrap();
        let found = store
            .find_user_by_email("ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = MemoryCredentialStore::new();
        store
            .create_user(new_user("a@example.com", Role::Customer))
            .await
            .unwrap();
        let err = store
            .create_user(new_user("A@example.com", Role::Customer))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ValidationError(_)));
    }

    #[tokio::test]
    async fn admin_exists_requires_active_admin() {
        let store = MemoryCredentialStore::new();
        assert!(!store.admin_exists().await.unwrap());
        let admin = store
            .create_user(new_user("root@example.com", Role::Admin))
            .await
            .unwrap();
        assert!(store.admin_exists().await.unwrap());
        store.set_status(admin.id, UserStatus::Inactive).await;
        assert!(!store.admin_exists().await.unwrap());
    }

    #[tokio::test]
    async fn refresh_token_revocation_is_single_shot() {
        let store = MemoryCredentialStore::new();
        store
            .store_refresh_token(NewRefreshToken {
                token_hash: "h1".into(),
                user_id: 1,
                expires_at: Utc::now() + Duration::days(1),
                created_by_ip: Some("10.0.0.1".into()),
                persistent: true,
            })
            .await
            .unwrap();

        assert!(store.find_active_refresh_token("h1").await.unwrap().is_some());
        assert!(store.revoke_refresh_token("h1", Some("10.0.0.2")).await.unwrap());
        assert!(!store.revoke_refresh_token("h1", None).await.unwrap());
        assert!(store.find_active_refresh_token("h1").await.unwrap().is_none());

        let row = store.refresh_token("h1").await.unwrap();
        assert!(row.revoked);
        assert_eq!(row.revoked_by_ip.as_deref(), Some("10.0.0.2"));
        assert_eq!(row.created_by_ip.as_deref(), Some("10.0.0.1"));
        assert!(row.persistent);
    }

    #[tokio::test]
    async fn expired_refresh_token_is_not_active() {
        let store = MemoryCredentialStore::new();
        store
            .store_refresh_token(NewRefreshToken {
                token_hash: "old".into(),
                user_id: 1,
                expires_at: Utc::now() - Duration::seconds(1),
                created_by_ip: None,
                persistent: false,
            })
            .await
            .unwrap();
        assert!(store.find_active_refresh_token("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn password_reset_is_consumed_once() {
        let store = MemoryCredentialStore::new();
        store
            .store_password_reset(3, "r1", Utc::now() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(store.consume_password_reset("r1").await.unwrap(), Some(3));
        assert_eq!(store.consume_password_reset("r1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = MemoryCredentialStore::new();
        store.set_unavailable(true);
        assert!(store.find_user_by_id(1).await.is_err());
        store.set_unavailable(false);
        assert!(store.find_user_by_id(1).await.unwrap().is_none());
    }
}
