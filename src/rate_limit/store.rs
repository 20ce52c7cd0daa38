//! Adapter to the shared external counter store.
//!
//! The store's one load-bearing operation is an atomic increment-and-expire.
//! It must be a single server-side operation: request handlers in many
//! processes increment the same key concurrently, and a read-then-write
//! sequence would lose updates under contention, silently doubling the
//! effective limit.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;

/// Errors from the counter store. These never reach API callers; the rate
/// limiter recovers by counting in-process.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("counter store unreachable: {0}")]
    Unreachable(String),
    #[error("counter store command failed: {0}")]
    Command(String),
}

/// Shared counter store interface.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter at `key` and reset its expiry to
    /// `ttl`, returning the post-increment value.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Connectivity probe for health reporting.
    async fn ping(&self) -> Result<(), StoreError>;
}

// INCR and PEXPIRE must happen in one server-side step; the script keeps the
// pair atomic under concurrent increments from other processes.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
redis.call('PEXPIRE', KEYS[1], ARGV[1])
return current
"#;

/// Redis-backed counter store.
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
    prefix: String,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("prefix", &self.prefix)
            .field("conn", &"<connection manager>")
            .finish()
    }
}

impl RedisCounterStore {
    /// Connect with the default key prefix and a 5 second connect timeout.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with(url, "rl", Duration::from_secs(5)).await
    }

    /// Connect with an explicit key prefix and connect timeout.
    pub async fn connect_with(
        url: &str,
        prefix: &str,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Unreachable(e.to_string()))?;

        // Bound the handshake so a dead store cannot stall startup.
        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Unreachable("connection timed out".to_string()))?
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        tracing::info!(
            target: "breakwater::rate_limit",
            url,
            "connected to shared counter store"
        );

        Ok(Self {
            conn,
            script: Script::new(INCREMENT_SCRIPT),
            prefix: prefix.to_string(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        let current: i64 = self
            .script
            .key(self.namespaced(key))
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        Ok(current.max(0) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect_test_store() -> Option<RedisCounterStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        RedisCounterStore::connect_with(&url, "breakwater_test", Duration::from_secs(1))
            .await
            .ok()
    }

    // Exercised only when a Redis instance is reachable via REDIS_URL.
    #[tokio::test]
    async fn increment_counts_and_expires() {
        let store = match connect_test_store().await {
            Some(store) => store,
            None => return,
        };

        let key = format!("it:{}", std::process::id());
        let ttl = Duration::from_millis(500);

        assert_eq!(store.increment(&key, ttl).await.unwrap(), 1);
        assert_eq!(store.increment(&key, ttl).await.unwrap(), 2);
        assert_eq!(store.increment(&key, ttl).await.unwrap(), 3);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(store.increment(&key, ttl).await.unwrap(), 1, "TTL resets the counter");

        assert!(store.ping().await.is_ok());
    }
}
