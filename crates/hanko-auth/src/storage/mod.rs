//! Storage traits for users, identities, tokens and audit entries.
//!
//! The account linking writes of a callback go through a [`Transaction`] so
//! they commit or roll back together. Everything else is a single statement on
//! the [`Persister`].
//!
//! # Implementations
//!
//! - [`MemoryPersister`] - in-process backend for tests and local development
//! - `hanko-auth-postgres` - PostgreSQL storage backend

mod memory;

use std::future::Future;

use async_trait::async_trait;
use uuid::Uuid;

use crate::AuthResult;
use crate::audit::AuditLogEntry;
use crate::types::{ExchangeToken, Identity, RefreshToken, User};

pub use memory::MemoryPersister;

/// Storage backend.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Starts a transaction.
    async fn begin(&self) -> AuthResult<Box<dyn Transaction>>;

    /// Performs a storage round trip.
    async fn health(&self) -> AuthResult<()>;

    /// Deletes the exchange token with the given hash and returns it.
    ///
    /// Must be atomic: of two concurrent calls for the same hash at most one
    /// returns `Some`. Expired tokens are returned too so the caller can tell
    /// them apart in logs; they are deleted either way.
    async fn redeem_exchange_token(&self, token_hash: &str) -> AuthResult<Option<ExchangeToken>>;

    /// Stores a new refresh token.
    async fn create_refresh_token(&self, token: &RefreshToken) -> AuthResult<()>;

    /// Finds a refresh token by hash regardless of expiry or revocation.
    async fn find_refresh_token(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>>;

    /// Revokes the token with `old_hash` and stores `new` in one step.
    ///
    /// Returns `false` and stores nothing if the old token is missing or
    /// already revoked, so a refresh token can be rotated at most once.
    async fn rotate_refresh_token(&self, old_hash: &str, new: &RefreshToken) -> AuthResult<bool>;

    /// Revokes a refresh token. Returns `false` if it was missing or already revoked.
    async fn revoke_refresh_token(&self, token_hash: &str) -> AuthResult<bool>;

    /// Appends an audit log entry.
    async fn create_audit_log(&self, entry: &AuditLogEntry) -> AuthResult<()>;

    /// Deletes expired exchange tokens and refresh tokens that are expired or
    /// revoked. Returns how many tokens were removed.
    async fn purge_expired_tokens(&self) -> AuthResult<u64>;
}

/// A storage transaction.
///
/// Dropping a transaction without calling [`Transaction::commit`] rolls it back.
#[async_trait]
pub trait Transaction: Send {
    async fn find_identity(
        &mut self,
        provider: &str,
        provider_user_id: &str,
    ) -> AuthResult<Option<Identity>>;

    async fn find_user(&mut self, id: Uuid) -> AuthResult<Option<User>>;

    /// Finds a user by normalized email address.
    async fn find_user_by_email(&mut self, email: &str) -> AuthResult<Option<User>>;

    /// Creates a user.
    ///
    /// Fails with `AccountLinkingConflict` if the email is taken.
    async fn create_user(&mut self, user: &User) -> AuthResult<()>;

    /// Creates an identity link.
    ///
    /// Fails with `AccountLinkingConflict` if `(provider, provider_user_id)`
    /// is already linked.
    async fn create_identity(&mut self, identity: &Identity) -> AuthResult<()>;

    /// Stores the latest provider profile and bumps `updated_at`.
    async fn touch_identity(&mut self, id: Uuid, data: &serde_json::Value) -> AuthResult<()>;

    async fn create_exchange_token(&mut self, token: &ExchangeToken) -> AuthResult<()>;

    async fn commit(self: Box<Self>) -> AuthResult<()>;

    async fn rollback(self: Box<Self>) -> AuthResult<()>;
}

/// Runs `f` inside a transaction.
///
/// `f` owns the transaction for its duration and hands it back with its
/// result. The transaction is committed if the result is `Ok` and rolled back
/// otherwise. If the future is dropped early (timeout, panic) the transaction
/// is dropped with it, which also rolls back.
///
/// ```ignore
/// let user = with_transaction(persister, |mut tx| async move {
///     let result = tx.find_user(id).await;
///     (tx, result)
/// })
/// .await?;
/// ```
pub async fn with_transaction<T, F, Fut>(persister: &dyn Persister, f: F) -> AuthResult<T>
where
    F: FnOnce(Box<dyn Transaction>) -> Fut,
    Fut: Future<Output = (Box<dyn Transaction>, AuthResult<T>)>,
{
    let tx = persister.begin().await?;
    let (tx, result) = f(tx).await;
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(err)
        }
    }
}
