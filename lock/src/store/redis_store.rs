//! Redis-backed [`AtomicStore`].
//!
//! Acquisition is a single `SET key value NX PX ttl`. Release runs a Lua
//! script on the server so the token comparison and the delete cannot be
//! interleaved with another client's write.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use tracing::debug;

use super::{AtomicStore, StoreError, StoreResult};

/// Compare the stored token with ARGV[1] and delete only on match.
const RELEASE_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    else
        return 0
    end
"#;

/// `Redis` lock store over a pooled connection manager.
#[derive(Clone)]
pub struct RedisStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    /// Pre-hashed release script (EVALSHA with EVAL fallback).
    release_script: Script,
}

impl RedisStore {
    /// Connect to `Redis`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the server cannot be reached and
    /// [`StoreError::Command`] if the URL is malformed.
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Command(format!("invalid Redis URL: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(classify)?;

        debug!(redis_url = %redis_url, "Connected lock store");

        Ok(Self {
            conn_manager,
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl AtomicStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn_manager.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        // Nil reply means the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(classify)?;

        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.conn_manager.clone();

        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(classify)?;

        Ok(deleted == 1)
    }
}

/// Split `Redis` errors into connectivity failures and command failures.
fn classify(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}
