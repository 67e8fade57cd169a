//! Storage backend selection.

use std::sync::Arc;
use std::time::Duration;

use hanko_auth::{MemoryPersister, Persister};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use hanko_auth_postgres::PostgresPersister;

use crate::config::{StorageBackend, StorageConfig};

/// Creates the persister for the configured backend.
///
/// # Errors
///
/// Returns an error if the PostgreSQL pool cannot be created or a migration fails.
pub async fn create_persister(config: &StorageConfig) -> anyhow::Result<Arc<dyn Persister>> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Ok(Arc::new(MemoryPersister::new()))
        }
        StorageBackend::Postgres => {
            let pg = config.postgres.to_postgres_config();
            let persister = PostgresPersister::connect(&pg).await?;
            tracing::info!(pool_size = pg.pool_size, "PostgreSQL storage ready");
            Ok(Arc::new(persister))
        }
    }
}

/// Starts a background task that purges expired and revoked tokens every `every`.
pub fn start_token_purge(persister: Arc<dyn Persister>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match persister.purge_expired_tokens().await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Purged expired tokens");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Token purge failed");
                }
                _ => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use hanko_auth::types::RefreshToken;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn test_token_purge_task_removes_expired_tokens() {
        let memory = MemoryPersister::new();
        let (_, live) = RefreshToken::generate(Uuid::new_v4(), Uuid::new_v4(), time::Duration::hours(1));
        let (_, mut expired) = RefreshToken::generate(Uuid::new_v4(), Uuid::new_v4(), time::Duration::hours(1));
        expired.expires_at = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        memory.create_refresh_token(&live).await.unwrap();
        memory.create_refresh_token(&expired).await.unwrap();

        let task = start_token_purge(Arc::new(memory.clone()), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        assert!(memory.find_refresh_token(&expired.token_hash).await.unwrap().is_none());
        assert!(memory.find_refresh_token(&live.token_hash).await.unwrap().is_some());
    }
}
