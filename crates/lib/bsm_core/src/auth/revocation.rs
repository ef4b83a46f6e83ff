//! Access token revocation list.
//!
//! Revoked token ids (or whole users) are kept until the moment the revoked
//! tokens would have expired anyway. The bundled implementation is
//! process-local: entries do not survive a restart and are not shared between
//! instances. Swap in another [`RevocationList`] to change that.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::AuthResult;
use super::opaque::digest_token;

/// What a revocation entry covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RevocationKey {
    /// A single access token, by its `jti` claim.
    TokenId(String),
    /// A single access token that could not be decoded, by SHA-256 digest.
    TokenDigest(String),
    /// Every token of a user issued up to the revocation time.
    User(i64),
}

impl RevocationKey {
    /// Key for a raw token string.
    pub fn raw_token(token: &str) -> Self {
        RevocationKey::TokenDigest(digest_token(token))
    }
}

/// A revocation with its eviction horizon.
#[derive(Debug, Clone)]
pub struct RevocationEntry {
    pub revoked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
}

impl RevocationEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Revocation registry consulted on every authenticated request.
#[async_trait]
pub trait RevocationList: Send + Sync {
    /// Record a revocation. Re-revoking a key replaces its entry.
    async fn revoke(
        &self,
        key: RevocationKey,
        expires_at: DateTime<Utc>,
        reason: &str,
    ) -> AuthResult<()>;

    /// Live entry for `key`. Expired entries read as absent.
    async fn lookup(&self, key: &RevocationKey) -> AuthResult<Option<RevocationEntry>>;

    /// Drop every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> AuthResult<usize>;

    async fn is_revoked(&self, key: &RevocationKey) -> AuthResult<bool> {
        Ok(self.lookup(key).await?.is_some())
    }

    /// Revoke every outstanding token of a user until `expires_at`.
    async fn revoke_user(
        &self,
        user_id: i64,
        expires_at: DateTime<Utc>,
        reason: &str,
    ) -> AuthResult<()> {
        self.revoke(RevocationKey::User(user_id), expires_at, reason)
            .await
    }
}

/// In-process revocation list backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryRevocationList {
    entries: DashMap<RevocationKey, RevocationEntry>,
}

impl InMemoryRevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RevocationList for InMemoryRevocationList {
    async fn revoke(
        &self,
        key: RevocationKey,
        expires_at: DateTime<Utc>,
        reason: &str,
    ) -> AuthResult<()> {
        debug!(?key, %expires_at, reason, "revoking");
        self.entries.insert(
            key,
            RevocationEntry {
                revoked_at: Utc::now(),
                expires_at,
                reason: reason.to_string(),
            },
        );
        Ok(())
    }

    async fn lookup(&self, key: &RevocationKey) -> AuthResult<Option<RevocationEntry>> {
        let now = Utc::now();
        let entry = match self.entries.get(key) {
            Some(entry) => entry.clone(),
            None => return Ok(None),
        };
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn purge_expired(&self) -> AuthResult<usize> {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

/// Periodically purge expired entries until `shutdown` is cancelled.
pub fn spawn_sweeper(
    list: Arc<dyn RevocationList>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match list.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "purged expired revocations"),
                    Err(e) => debug!(error = %e, "revocation sweep failed"),
                },
            }
        }
        info!("revocation sweeper stopped");
    })
}
