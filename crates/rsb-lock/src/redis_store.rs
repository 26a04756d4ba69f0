//! Redis-backed [`LockStore`].
//!
//! Acquire is `SET key holder NX PX ttl`. Refresh and release go through
//! small Lua scripts so the holder comparison and the mutation are one
//! atomic step on the server.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use rsb_schemas::{SyncError, SyncResult};

use crate::LockStore;

const EXTEND_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

pub struct RedisLockStore {
    conn: ConnectionManager,
    extend: Script,
    release: Script,
}

impl RedisLockStore {
    /// Connect to `redis_url`. The connection manager reconnects on its own;
    /// individual command failures still surface as transient errors.
    pub async fn connect(redis_url: &str) -> SyncResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| SyncError::validation("redis_url", e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(redis_transient)?;
        Ok(Self {
            conn,
            extend: Script::new(EXTEND_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
        })
    }
}

fn redis_transient(e: redis::RedisError) -> SyncError {
    SyncError::transient("redis_error", e.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().max(1) as u64
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn put_if_absent(&self, key: &str, holder: &str, ttl: Duration) -> SyncResult<bool> {
        let mut conn = self.conn.clone();
        let set: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(redis_transient)?;
        Ok(set.is_some())
    }

    async fn extend_if_held(&self, key: &str, holder: &str, ttl: Duration) -> SyncResult<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .extend
            .key(key)
            .arg(holder)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(redis_transient)?;
        Ok(extended == 1)
    }

    async fn delete_if_held(&self, key: &str, holder: &str) -> SyncResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(holder)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_transient)?;
        Ok(deleted == 1)
    }
}
