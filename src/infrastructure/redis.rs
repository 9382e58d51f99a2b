//! Redis-backed confirmation locks.
//!
//! Acquisition is a single `SET key value NX PX ttl`. Release runs a Lua
//! compare-and-delete so a lock is only removed by the issuance that owns it.

use crate::domain::ports::DistributedLock;
use crate::error::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::ConnectionManager};
use std::time::Duration;
use tracing::{debug, info};

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisDistributedLock {
    conn: ConnectionManager,
    release: Script,
}

impl RedisDistributedLock {
    /// Connects to `url` (e.g. `redis://localhost:6379`).
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for confirmation locks");

        Ok(Self {
            conn,
            release: Script::new(COMPARE_AND_DELETE),
        })
    }
}

#[async_trait]
impl DistributedLock for RedisDistributedLock {
    async fn try_set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        let acquired = reply.is_some();
        debug!(key = %key, acquired, "Lock acquisition attempt");
        Ok(acquired)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete_if_owner(&self, key: &str, owner_token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(owner_token)
            .invoke_async(&mut conn)
            .await?;

        debug!(key = %key, deleted = deleted > 0, "Lock release attempt");
        Ok(deleted > 0)
    }
}
