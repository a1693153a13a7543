pub mod memory;
pub mod postgres;
pub mod redis;
pub mod store;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, KvBackend};
use crate::error::AppResult;
use crate::services::cluster_job::{JobLock, LocalJobLock};

pub use self::memory::MemoryKvStore;
pub use self::postgres::{create_pool, PgKvStore};
pub use self::redis::{create_redis_client, RedisJobLock, RedisKvStore};
pub use self::store::{StoreKey, SuggestStore};

/// Byte-oriented key-value persistence
///
/// Every write replaces the whole value under its key, so a reader never
/// observes a partially written entry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8]) -> AppResult<()>;

    /// Deleting an absent key is not an error
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}

/// Opens the configured key-value backend and the matching job lock
pub async fn connect(config: &Config) -> anyhow::Result<(Arc<dyn KvStore>, Arc<dyn JobLock>)> {
    match config.kv_backend {
        KvBackend::Redis => {
            let client = create_redis_client(&config.redis_url)?;
            let conn = client.get_connection_manager().await?;
            tracing::info!(url = %config.redis_url, "Connected to Redis");

            let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::new(conn.clone()));
            let lock: Arc<dyn JobLock> = Arc::new(RedisJobLock::new(conn));
            Ok((kv, lock))
        }
        KvBackend::Postgres => {
            let pool = create_pool(&config.database_url).await?;
            let kv = PgKvStore::new(pool);
            kv.migrate().await?;
            tracing::info!("Connected to PostgreSQL");
            tracing::warn!("PostgreSQL backend uses a process-local job lock; run a single instance");

            let kv: Arc<dyn KvStore> = Arc::new(kv);
            let lock: Arc<dyn JobLock> = Arc::new(LocalJobLock::new());
            Ok((kv, lock))
        }
        KvBackend::Memory => {
            tracing::warn!("Using in-memory store; state is lost on restart");
            let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
            let lock: Arc<dyn JobLock> = Arc::new(LocalJobLock::new());
            Ok((kv, lock))
        }
    }
}
