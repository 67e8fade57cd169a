//! PostgreSQL storage backend for hanko-auth.
//!
//! Provides [`PostgresPersister`], an implementation of
//! [`hanko_auth::Persister`] on a pooled `sqlx` connection:
//!
//! - users and third-party identities, written in callback transactions
//! - one-time exchange tokens, redeemed with `DELETE ... RETURNING`
//! - refresh tokens, rotated with a conditional `UPDATE`
//! - audit log entries
//!
//! Every transaction sets `statement_timeout` and
//! `idle_in_transaction_session_timeout` locally, so a stalled provider call
//! cannot keep a transaction open.
//!
//! # Example
//!
//! ```ignore
//! use hanko_auth_postgres::{PostgresConfig, PostgresPersister};
//!
//! let persister = PostgresPersister::connect(&PostgresConfig::new("postgres://localhost/hanko")).await?;
//! ```

pub mod config;
pub mod migrations;
pub mod persister;
pub mod pool;
mod rows;
pub mod transaction;

use hanko_auth::AuthError;
use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use config::PostgresConfig;
pub use persister::PostgresPersister;
pub use transaction::PostgresTransaction;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// A unique constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Applying the schema migrations failed.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The transaction was already committed or rolled back.
    #[error("Transaction already completed")]
    TransactionCompleted,
}

impl StorageError {
    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Maps unique violations to [`StorageError::Conflict`].
    pub(crate) fn from_write(err: sqlx_core::Error) -> Self {
        if let sqlx_core::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            let message = match db_err.constraint() {
                Some("users_email_key") => "a user with this email already exists".to_string(),
                Some("identities_provider_user_key") => {
                    "third-party identity is already linked".to_string()
                }
                Some(constraint) => format!("unique constraint '{constraint}' violated"),
                None => "unique constraint violated".to_string(),
            };
            return Self::Conflict(message);
        }
        Self::Database(err)
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(message) => AuthError::account_linking_conflict(message),
            other => AuthError::storage(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
