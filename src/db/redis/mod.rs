pub mod kv;
pub mod lock;

pub use kv::{create_redis_client, RedisKvStore};
pub use lock::RedisJobLock;
