use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use crate::db::StoreKey;
use crate::error::AppResult;
use crate::services::cluster_job::{JobLock, LockToken};

const LOCK_NAMESPACE: &str = "suggest:";

// Deletes the lock only while it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

// Extends the TTL only while the lock still holds our token.
const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Cluster-wide job lock on a single Redis key
///
/// Acquired with `SET NX PX` so a crashed holder loses the lock once the
/// TTL runs out.
#[derive(Clone)]
pub struct RedisJobLock {
    conn: ConnectionManager,
}

impl RedisJobLock {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn lock_key(name: &str) -> String {
    format!("{}{}", LOCK_NAMESPACE, StoreKey::JobLock(name.to_string()))
}

#[async_trait]
impl JobLock for RedisJobLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> AppResult<Option<LockToken>> {
        let mut conn = self.conn.clone();
        let token = LockToken::generate();
        let ttl_ms = ttl_millis(ttl);

        let reply: Option<String> = redis::cmd("SET")
            .arg(lock_key(name))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| token))
    }

    async fn renew(&self, name: &str, token: &LockToken, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.conn.clone();
        let renewed: i32 = redis::Script::new(RENEW_SCRIPT)
            .key(lock_key(name))
            .arg(token.as_str())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        Ok(renewed == 1)
    }

    async fn release(&self, name: &str, token: &LockToken) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let released: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(lock_key(name))
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;

        if released == 0 {
            tracing::warn!(job = %name, "Job lock expired before release");
        }
        Ok(())
    }
}
