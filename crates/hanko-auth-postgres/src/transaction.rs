//! Transaction used for the account linking writes of a callback.

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::{PgConnection, PgTransaction};
use time::OffsetDateTime;
use uuid::Uuid;

use hanko_auth::types::{ExchangeToken, Identity, User};
use hanko_auth::{AuthResult, Transaction};

use crate::rows::{self, IDENTITY_COLUMNS, IdentityRow, USER_COLUMNS, UserRow};
use crate::{StorageError, StorageResult};

/// Wraps an sqlx transaction. Rolls back on drop if not committed.
pub struct PostgresTransaction {
    /// `None` once committed or rolled back.
    tx: Option<PgTransaction<'static>>,
}

impl PostgresTransaction {
    pub(crate) fn new(tx: PgTransaction<'static>) -> Self {
        Self { tx: Some(tx) }
    }

    fn conn(&mut self) -> StorageResult<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or(StorageError::TransactionCompleted)
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::debug!("Transaction dropped without commit, rolling back");
        }
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn find_identity(
        &mut self,
        provider: &str,
        provider_user_id: &str,
    ) -> AuthResult<Option<Identity>> {
        let sql = format!(
            "SELECT {IDENTITY_COLUMNS} FROM identities WHERE provider = $1 AND provider_user_id = $2"
        );
        let row: Option<IdentityRow> = query_as(&sql)
            .bind(provider)
            .bind(provider_user_id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(StorageError::from)?;
        Ok(row.map(rows::identity))
    }

    async fn find_user(&mut self, id: Uuid) -> AuthResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row: Option<UserRow> = query_as(&sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await
            .map_err(StorageError::from)?;
        Ok(row.map(rows::user))
    }

    async fn find_user_by_email(&mut self, email: &str) -> AuthResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row: Option<UserRow> = query_as(&sql)
            .bind(email)
            .fetch_optional(self.conn()?)
            .await
            .map_err(StorageError::from)?;
        Ok(row.map(rows::user))
    }

    async fn create_user(&mut self, user: &User) -> AuthResult<()> {
        query(
            r#"
            INSERT INTO users (id, email, email_verified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(user.email.as_deref())
        .bind(user.email_verified)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(StorageError::from_write)?;
        Ok(())
    }

    async fn create_identity(&mut self, identity: &Identity) -> AuthResult<()> {
        query(
            r#"
            INSERT INTO identities (id, provider, provider_user_id, user_id, data, linked_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(identity.id)
        .bind(&identity.provider)
        .bind(&identity.provider_user_id)
        .bind(identity.user_id)
        .bind(&identity.data)
        .bind(identity.linked_at)
        .bind(identity.updated_at)
        .execute(self.conn()?)
        .await
        .map_err(StorageError::from_write)?;
        Ok(())
    }

    async fn touch_identity(&mut self, id: Uuid, data: &serde_json::Value) -> AuthResult<()> {
        let result = query("UPDATE identities SET data = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(data)
            .bind(OffsetDateTime::now_utc())
            .execute(self.conn()?)
            .await
            .map_err(StorageError::from)?;
        if result.rows_affected() == 0 {
            return Err(hanko_auth::AuthError::not_found(format!("identity {id}")));
        }
        Ok(())
    }

    async fn create_exchange_token(&mut self, token: &ExchangeToken) -> AuthResult<()> {
        query(
            r#"
            INSERT INTO exchange_tokens (id, token_hash, user_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(token.id)
        .bind(&token.token_hash)
        .bind(token.user_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(self.conn()?)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> AuthResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(StorageError::from)?;
            tracing::debug!("Transaction committed");
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> AuthResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(StorageError::from)?;
            tracing::debug!("Transaction rolled back");
        }
        Ok(())
    }
}
