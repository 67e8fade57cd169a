//! Embedded schema migrations.

use std::borrow::Cow;

use sqlx_core::migrate::{Migration, MigrationType, Migrator};
use tracing::{info, instrument};

use crate::{PgPool, StorageError, StorageResult};

/// Embedded migrations in chronological order: `(version, description, sql)`.
const MIGRATIONS: &[(i64, &str, &str)] = &[(
    20240101000001,
    "initial_schema",
    include_str!("../migrations/20240101000001_initial_schema.sql"),
)];

fn build_migrations() -> Vec<Migration> {
    MIGRATIONS
        .iter()
        .map(|(version, description, sql)| Migration {
            version: *version,
            description: Cow::Borrowed(*description),
            migration_type: MigrationType::Simple,
            sql: Cow::Borrowed(*sql),
            checksum: Cow::Borrowed(&[]),
            no_tx: false,
        })
        .collect()
}

/// Applies pending migrations. Applied versions are tracked in `_sqlx_migrations`.
///
/// # Errors
///
/// Returns `StorageError::Migration` if a migration fails.
#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> StorageResult<()> {
    let migrations = build_migrations();
    info!(count = migrations.len(), "Running database migrations");

    let migrator = Migrator {
        migrations: Cow::Owned(migrations),
        ignore_missing: false,
        locking: true,
        no_tx: false,
    };
    migrator
        .run(pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

    info!("Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered() {
        let versions: Vec<i64> = build_migrations().iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_schema_has_uniqueness_constraints() {
        let sql = MIGRATIONS[0].2;
        assert!(sql.contains("identities_provider_user_key UNIQUE (provider, provider_user_id)"));
        assert!(sql.contains("users_email_key UNIQUE (email)"));
    }
}
