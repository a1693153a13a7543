use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::Client;

use crate::db::KvStore;
use crate::error::AppResult;

const DEFAULT_NAMESPACE: &str = "suggest:";

/// Creates a Redis client
///
/// Connections are opened lazily through a `ConnectionManager`, which
/// reconnects on its own after a dropped connection.
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Key-value store on Redis strings, every key prefixed with a namespace
#[derive(Clone)]
pub struct RedisKvStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisKvStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_namespace(conn, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            namespace: namespace.to_string(),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        namespaced_key(&self.namespace, key)
    }
}

fn namespaced_key(namespace: &str, key: &str) -> String {
    format!("{}{}", namespace, key)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(self.namespaced(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.namespaced(key), value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.namespaced(key)).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
