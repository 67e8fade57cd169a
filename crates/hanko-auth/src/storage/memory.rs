//! In-memory storage backend.
//!
//! Transactions stage their writes and apply them at commit under the write
//! lock, re-checking the same uniqueness constraints as the SQL schema. Two
//! transactions racing to link the same third-party account therefore end with
//! one commit and one `AccountLinkingConflict`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Persister, Transaction};
use crate::AuthResult;
use crate::audit::AuditLogEntry;
use crate::error::AuthError;
use crate::types::{ExchangeToken, Identity, RefreshToken, User};

#[derive(Debug, Default)]
struct MemoryData {
    users: HashMap<Uuid, User>,
    /// Keyed by `(provider, provider_user_id)`.
    identities: HashMap<(String, String), Identity>,
    /// Keyed by token hash.
    exchange_tokens: HashMap<String, ExchangeToken>,
    /// Keyed by token hash.
    refresh_tokens: HashMap<String, RefreshToken>,
    audit_logs: Vec<AuditLogEntry>,
}

impl MemoryData {
    fn email_taken(&self, email: &str) -> bool {
        self.users
            .values()
            .any(|u| u.email.as_deref() == Some(email))
    }
}

/// In-memory [`Persister`].
///
/// Cloning shares the underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersister {
    data: Arc<RwLock<MemoryData>>,
    unhealthy: Arc<AtomicBool>,
}

impl MemoryPersister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes [`Persister::health`] fail, for readiness tests.
    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    /// Snapshot of all users.
    pub async fn users(&self) -> Vec<User> {
        self.data.read().await.users.values().cloned().collect()
    }

    /// Snapshot of all identities.
    pub async fn identities(&self) -> Vec<Identity> {
        self.data.read().await.identities.values().cloned().collect()
    }

    /// Snapshot of the audit log, oldest first.
    pub async fn audit_logs(&self) -> Vec<AuditLogEntry> {
        self.data.read().await.audit_logs.clone()
    }

    /// Number of unredeemed exchange tokens.
    pub async fn exchange_token_count(&self) -> usize {
        self.data.read().await.exchange_tokens.len()
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    async fn begin(&self) -> AuthResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            data: Arc::clone(&self.data),
            users: Vec::new(),
            identities: Vec::new(),
            touched: Vec::new(),
            exchange_tokens: Vec::new(),
        }))
    }

    async fn health(&self) -> AuthResult<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(AuthError::storage("memory storage marked unhealthy"));
        }
        Ok(())
    }

    async fn redeem_exchange_token(&self, token_hash: &str) -> AuthResult<Option<ExchangeToken>> {
        Ok(self.data.write().await.exchange_tokens.remove(token_hash))
    }

    async fn create_refresh_token(&self, token: &RefreshToken) -> AuthResult<()> {
        let mut data = self.data.write().await;
        if data.refresh_tokens.contains_key(&token.token_hash) {
            return Err(AuthError::storage("duplicate refresh token hash"));
        }
        data.refresh_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>> {
        Ok(self.data.read().await.refresh_tokens.get(token_hash).cloned())
    }

    async fn rotate_refresh_token(&self, old_hash: &str, new: &RefreshToken) -> AuthResult<bool> {
        let mut data = self.data.write().await;
        match data.refresh_tokens.get_mut(old_hash) {
            Some(old) if old.revoked_at.is_none() => {
                old.revoked_at = Some(OffsetDateTime::now_utc());
            }
            _ => return Ok(false),
        }
        data.refresh_tokens.insert(new.token_hash.clone(), new.clone());
        Ok(true)
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> AuthResult<bool> {
        let mut data = self.data.write().await;
        match data.refresh_tokens.get_mut(token_hash) {
            Some(token) if token.revoked_at.is_none() => {
                token.revoked_at = Some(OffsetDateTime::now_utc());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_audit_log(&self, entry: &AuditLogEntry) -> AuthResult<()> {
        self.data.write().await.audit_logs.push(entry.clone());
        Ok(())
    }

    async fn purge_expired_tokens(&self) -> AuthResult<u64> {
        let mut data = self.data.write().await;
        let before = data.exchange_tokens.len() + data.refresh_tokens.len();
        data.exchange_tokens.retain(|_, t| !t.is_expired());
        data.refresh_tokens.retain(|_, t| t.is_valid());
        let after = data.exchange_tokens.len() + data.refresh_tokens.len();
        Ok((before - after) as u64)
    }
}

/// Transaction over [`MemoryPersister`]. Reads see committed data plus this
/// transaction's own staged writes.
struct MemoryTransaction {
    data: Arc<RwLock<MemoryData>>,
    users: Vec<User>,
    identities: Vec<Identity>,
    touched: Vec<(Uuid, serde_json::Value, OffsetDateTime)>,
    exchange_tokens: Vec<ExchangeToken>,
}

fn identity_conflict(identity: &Identity) -> AuthError {
    AuthError::account_linking_conflict(format!(
        "identity {}/{} is already linked",
        identity.provider, identity.provider_user_id
    ))
}

fn email_conflict() -> AuthError {
    AuthError::account_linking_conflict("a user with this email already exists")
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn find_identity(
        &mut self,
        provider: &str,
        provider_user_id: &str,
    ) -> AuthResult<Option<Identity>> {
        if let Some(staged) = self
            .identities
            .iter()
            .find(|i| i.provider == provider && i.provider_user_id == provider_user_id)
        {
            return Ok(Some(staged.clone()));
        }
        let data = self.data.read().await;
        Ok(data
            .identities
            .get(&(provider.to_string(), provider_user_id.to_string()))
            .cloned())
    }

    async fn find_user(&mut self, id: Uuid) -> AuthResult<Option<User>> {
        if let Some(staged) = self.users.iter().find(|u| u.id == id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.data.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&mut self, email: &str) -> AuthResult<Option<User>> {
        if let Some(staged) = self
            .users
            .iter()
            .find(|u| u.email.as_deref() == Some(email))
        {
            return Ok(Some(staged.clone()));
        }
        let data = self.data.read().await;
        Ok(data
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn create_user(&mut self, user: &User) -> AuthResult<()> {
        if let Some(email) = &user.email {
            let staged = self.users.iter().any(|u| u.email.as_ref() == Some(email));
            if staged || self.data.read().await.email_taken(email) {
                return Err(email_conflict());
            }
        }
        self.users.push(user.clone());
        Ok(())
    }

    async fn create_identity(&mut self, identity: &Identity) -> AuthResult<()> {
        if self
            .find_identity(&identity.provider, &identity.provider_user_id)
            .await?
            .is_some()
        {
            return Err(identity_conflict(identity));
        }
        self.identities.push(identity.clone());
        Ok(())
    }

    async fn touch_identity(&mut self, id: Uuid, data: &serde_json::Value) -> AuthResult<()> {
        let now = OffsetDateTime::now_utc();
        if let Some(staged) = self.identities.iter_mut().find(|i| i.id == id) {
            staged.data = data.clone();
            staged.updated_at = now;
        } else {
            self.touched.push((id, data.clone(), now));
        }
        Ok(())
    }

    async fn create_exchange_token(&mut self, token: &ExchangeToken) -> AuthResult<()> {
        self.exchange_tokens.push(token.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AuthResult<()> {
        let store = Arc::clone(&self.data);
        let mut data = store.write().await;

        // Validate everything first so a failed commit applies nothing.
        for user in &self.users {
            if data.users.contains_key(&user.id) {
                return Err(AuthError::storage(format!("duplicate user id {}", user.id)));
            }
            if let Some(email) = &user.email
                && data.email_taken(email)
            {
                return Err(email_conflict());
            }
        }
        for identity in &self.identities {
            let key = (
                identity.provider.clone(),
                identity.provider_user_id.clone(),
            );
            if data.identities.contains_key(&key) {
                return Err(identity_conflict(identity));
            }
            if !data.users.contains_key(&identity.user_id)
                && !self.users.iter().any(|u| u.id == identity.user_id)
            {
                return Err(AuthError::storage(format!(
                    "identity references unknown user {}",
                    identity.user_id
                )));
            }
        }

        let MemoryTransaction {
            users,
            identities,
            touched,
            exchange_tokens,
            ..
        } = *self;
        for user in users {
            data.users.insert(user.id, user);
        }
        for identity in identities {
            data.identities.insert(
                (
                    identity.provider.clone(),
                    identity.provider_user_id.clone(),
                ),
                identity,
            );
        }
        for (id, profile, updated_at) in touched {
            if let Some(identity) = data.identities.values_mut().find(|i| i.id == id) {
                identity.data = profile;
                identity.updated_at = updated_at;
            }
        }
        for token in exchange_tokens {
            data.exchange_tokens.insert(token.token_hash.clone(), token);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AuthResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::with_transaction;
    use time::Duration;

    fn identity_for(user: &User, external_id: &str) -> Identity {
        Identity::new("google", external_id, user.id, serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_commit_applies_staged_writes() {
        let persister = MemoryPersister::new();
        let user = User::new(Some("a@example.com".to_string()), true);
        let identity = identity_for(&user, "g-1");

        let mut tx = persister.begin().await.unwrap();
        tx.create_user(&user).await.unwrap();
        tx.create_identity(&identity).await.unwrap();
        assert!(tx.find_identity("google", "g-1").await.unwrap().is_some());
        assert!(persister.users().await.is_empty());
        tx.commit().await.unwrap();

        assert_eq!(persister.users().await.len(), 1);
        assert_eq!(persister.identities().await.len(), 1);
    }

    #[tokio::test]
    async fn test_drop_discards_staged_writes() {
        let persister = MemoryPersister::new();
        {
            let mut tx = persister.begin().await.unwrap();
            tx.create_user(&User::new(None, false)).await.unwrap();
        }
        let tx = persister.begin().await.unwrap();
        tx.rollback().await.unwrap();
        assert!(persister.users().await.is_empty());
    }

    #[tokio::test]
    async fn test_racing_links_produce_one_identity() {
        let persister = MemoryPersister::new();
        let mut tx1 = persister.begin().await.unwrap();
        let mut tx2 = persister.begin().await.unwrap();

        let user1 = User::new(None, false);
        let user2 = User::new(None, false);
        tx1.create_user(&user1).await.unwrap();
        tx1.create_identity(&identity_for(&user1, "g-7")).await.unwrap();
        tx2.create_user(&user2).await.unwrap();
        tx2.create_identity(&identity_for(&user2, "g-7")).await.unwrap();

        tx1.commit().await.unwrap();
        let err = tx2.commit().await.unwrap_err();
        assert!(matches!(err, AuthError::AccountLinkingConflict { .. }));

        assert_eq!(persister.users().await.len(), 1);
        assert_eq!(persister.identities().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let persister = MemoryPersister::new();
        let mut tx = persister.begin().await.unwrap();
        tx.create_user(&User::new(Some("a@example.com".to_string()), true))
            .await
            .unwrap();
        let err = tx
            .create_user(&User::new(Some("A@Example.com".to_string()), true))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountLinkingConflict { .. }));
    }

    #[tokio::test]
    async fn test_with_transaction_rolls_back_on_error() {
        let persister = MemoryPersister::new();
        let result: AuthResult<()> = with_transaction(&persister, |mut tx| async move {
            let result: AuthResult<()> = async {
                tx.create_user(&User::new(None, false)).await?;
                Err(AuthError::internal("boom"))
            }
            .await;
            (tx, result)
        })
        .await;
        assert!(result.is_err());
        assert!(persister.users().await.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_token_redeemed_once() {
        let persister = MemoryPersister::new();
        let user = User::new(None, false);
        let (value, token) = ExchangeToken::generate(user.id);

        let mut tx = persister.begin().await.unwrap();
        tx.create_user(&user).await.unwrap();
        tx.create_exchange_token(&token).await.unwrap();
        tx.commit().await.unwrap();

        let hash = crate::types::hash_token(&value);
        assert!(persister.redeem_exchange_token(&hash).await.unwrap().is_some());
        assert!(persister.redeem_exchange_token(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_token_rotates_once() {
        let persister = MemoryPersister::new();
        let (_, old) = RefreshToken::generate(Uuid::new_v4(), Uuid::new_v4(), Duration::hours(1));
        let (_, new1) = RefreshToken::generate(old.user_id, old.session_id, Duration::hours(1));
        let (_, new2) = RefreshToken::generate(old.user_id, old.session_id, Duration::hours(1));
        persister.create_refresh_token(&old).await.unwrap();

        assert!(persister.rotate_refresh_token(&old.token_hash, &new1).await.unwrap());
        assert!(!persister.rotate_refresh_token(&old.token_hash, &new2).await.unwrap());

        let stored = persister.find_refresh_token(&old.token_hash).await.unwrap().unwrap();
        assert!(stored.is_revoked());
        assert!(persister.find_refresh_token(&new2.token_hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_keeps_live_tokens() {
        let persister = MemoryPersister::new();
        let user = User::new(None, false);
        let (_, live_exchange) = ExchangeToken::generate(user.id);
        let (_, mut stale_exchange) = ExchangeToken::generate(user.id);
        stale_exchange.expires_at = OffsetDateTime::now_utc() - Duration::minutes(5);

        let mut tx = persister.begin().await.unwrap();
        tx.create_user(&user).await.unwrap();
        tx.create_exchange_token(&live_exchange).await.unwrap();
        tx.create_exchange_token(&stale_exchange).await.unwrap();
        tx.commit().await.unwrap();

        let (_, live) = RefreshToken::generate(user.id, Uuid::new_v4(), Duration::hours(1));
        let (_, mut expired) = RefreshToken::generate(user.id, Uuid::new_v4(), Duration::hours(1));
        expired.expires_at = OffsetDateTime::now_utc() - Duration::minutes(1);
        let (_, revoked) = RefreshToken::generate(user.id, Uuid::new_v4(), Duration::hours(1));
        for token in [&live, &expired, &revoked] {
            persister.create_refresh_token(token).await.unwrap();
        }
        assert!(persister.revoke_refresh_token(&revoked.token_hash).await.unwrap());

        assert_eq!(persister.purge_expired_tokens().await.unwrap(), 3);
        assert_eq!(persister.exchange_token_count().await, 1);
        assert!(persister.find_refresh_token(&live.token_hash).await.unwrap().is_some());
        assert!(persister.find_refresh_token(&expired.token_hash).await.unwrap().is_none());
        assert!(persister.find_refresh_token(&revoked.token_hash).await.unwrap().is_none());

        assert_eq!(persister.purge_expired_tokens().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_health_toggle() {
        let persister = MemoryPersister::new();
        assert!(persister.health().await.is_ok());
        persister.set_healthy(false);
        assert!(persister.health().await.is_err());
    }
}
