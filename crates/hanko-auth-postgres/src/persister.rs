//! PostgreSQL implementation of [`Persister`].

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use hanko_auth::audit::AuditLogEntry;
use hanko_auth::types::{ExchangeToken, RefreshToken};
use hanko_auth::{AuthResult, Persister, Transaction};

use crate::config::PostgresConfig;
use crate::rows::{
    self, EXCHANGE_TOKEN_COLUMNS, ExchangeTokenRow, REFRESH_TOKEN_COLUMNS, RefreshTokenRow,
};
use crate::transaction::PostgresTransaction;
use crate::{PgPool, StorageError, StorageResult, migrations, pool};

/// PostgreSQL storage backend.
#[derive(Debug, Clone)]
pub struct PostgresPersister {
    pool: PgPool,
    config: PostgresConfig,
}

impl PostgresPersister {
    /// Creates the pool and runs migrations if enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or a migration fails.
    #[instrument(skip(config))]
    pub async fn connect(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = pool::create_pool(config).await?;
        if config.run_migrations {
            migrations::run(&pool).await?;
        } else {
            info!("Skipping database migrations");
        }
        Ok(Self::new(pool, config.clone()))
    }

    /// Wraps an existing pool. Migrations are not run.
    #[must_use]
    pub fn new(pool: PgPool, config: PostgresConfig) -> Self {
        Self { pool, config }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin_with_timeouts(&self) -> StorageResult<PostgresTransaction> {
        let mut tx = self.pool.begin().await?;
        query(
            "SELECT set_config('statement_timeout', $1, true), \
             set_config('idle_in_transaction_session_timeout', $2, true)",
        )
        .bind(format!("{}ms", self.config.statement_timeout_ms))
        .bind(format!("{}ms", self.config.idle_in_transaction_timeout_ms))
        .execute(&mut *tx)
        .await?;
        Ok(PostgresTransaction::new(tx))
    }
}

#[async_trait]
impl Persister for PostgresPersister {
    async fn begin(&self) -> AuthResult<Box<dyn Transaction>> {
        Ok(Box::new(self.begin_with_timeouts().await?))
    }

    async fn health(&self) -> AuthResult<()> {
        let _: i32 = query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }

    async fn redeem_exchange_token(&self, token_hash: &str) -> AuthResult<Option<ExchangeToken>> {
        let sql = format!(
            "DELETE FROM exchange_tokens WHERE token_hash = $1 RETURNING {EXCHANGE_TOKEN_COLUMNS}"
        );
        let row: Option<ExchangeTokenRow> = query_as(&sql)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(row.map(rows::exchange_token))
    }

    async fn create_refresh_token(&self, token: &RefreshToken) -> AuthResult<()> {
        insert_refresh_token(&self.pool, token).await?;
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> AuthResult<Option<RefreshToken>> {
        let sql =
            format!("SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        let row: Option<RefreshTokenRow> = query_as(&sql)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(row.map(rows::refresh_token))
    }

    async fn rotate_refresh_token(&self, old_hash: &str, new: &RefreshToken) -> AuthResult<bool> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        let revoked: Option<Uuid> = query_scalar(
            r#"
            UPDATE refresh_tokens SET revoked_at = NOW()
            WHERE token_hash = $1 AND revoked_at IS NULL
            RETURNING id
            "#,
        )
        .bind(old_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StorageError::from)?;

        if revoked.is_none() {
            debug!("Refresh token already rotated or unknown");
            tx.rollback().await.map_err(StorageError::from)?;
            return Ok(false);
        }

        insert_refresh_token(&mut *tx, new).await?;
        tx.commit().await.map_err(StorageError::from)?;
        Ok(true)
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> AuthResult<bool> {
        let result = query(
            "UPDATE refresh_tokens SET revoked_at = NOW() WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_audit_log(&self, entry: &AuditLogEntry) -> AuthResult<()> {
        let request = serde_json::to_value(&entry.request).map_err(StorageError::from)?;
        query(
            r#"
            INSERT INTO audit_logs (id, event_type, user_id, error, request, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.event_type.as_str())
        .bind(entry.user_id)
        .bind(entry.error.as_deref())
        .bind(request)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn purge_expired_tokens(&self) -> AuthResult<u64> {
        let exchange = query("DELETE FROM exchange_tokens WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        let refresh = query(
            "DELETE FROM refresh_tokens WHERE expires_at < NOW() OR revoked_at IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;

        let removed = exchange.rows_affected() + refresh.rows_affected();
        debug!(
            exchange_tokens = exchange.rows_affected(),
            refresh_tokens = refresh.rows_affected(),
            "Purged expired tokens"
        );
        Ok(removed)
    }
}

async fn insert_refresh_token<'e, E>(executor: E, token: &RefreshToken) -> StorageResult<()>
where
    E: sqlx_core::executor::Executor<'e, Database = sqlx_postgres::Postgres>,
{
    query(
        r#"
        INSERT INTO refresh_tokens (id, token_hash, user_id, session_id, created_at, expires_at, revoked_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(token.id)
    .bind(&token.token_hash)
    .bind(token.user_id)
    .bind(token.session_id)
    .bind(token.created_at)
    .bind(token.expires_at)
    .bind(token.revoked_at)
    .execute(executor)
    .await
    .map_err(StorageError::from_write)?;
    Ok(())
}
