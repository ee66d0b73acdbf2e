//! Redis-backed window store.
//!
//! Provides a distributed window store using Redis, allowing admission
//! quotas to be shared across multiple serving instances.
//!
//! ## Architecture
//!
//! Each caller window is one sorted set:
//! - Key: configurable prefix plus the caller identifier
//! - Members: unique entry ids
//! - Scores: entry timestamps in microseconds since the Unix epoch
//! - TTL: refreshed to the window length on every admission
//!
//! An admission runs `ZREMRANGEBYSCORE`, `ZCARD`, `ZADD` and `EXPIRE` in
//! one `MULTI`/`EXEC` pipeline, so concurrent instances observe a
//! consistent count.
//!
//! ## Example
//!
//! ```rust,ignore
//! use investwise_serving::infrastructure::redis_store::RedisWindowStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisWindowStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//! }
//! ```

use crate::application::ports::{StoreError, WindowStore};
use crate::domain::window::{WindowEntry, WindowTimestamp};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::fmt;
use std::time::Duration;

/// Configuration for the Redis window store.
#[derive(Debug, Clone)]
pub struct RedisWindowStoreConfig {
    /// Key prefix for caller windows (default: "rate_limit:")
    pub key_prefix: String,
}

impl Default for RedisWindowStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "rate_limit:".to_string(),
        }
    }
}

/// Sorted-set window store shared through Redis.
#[derive(Clone)]
pub struct RedisWindowStore {
    connection: ConnectionManager,
    config: RedisWindowStoreConfig,
}

impl fmt::Debug for RedisWindowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisWindowStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisWindowStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisWindowStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisWindowStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::debug!(prefix = %config.key_prefix, "connected to redis window store");
        Ok(Self { connection, config })
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}{}", self.config.key_prefix, identifier)
    }
}

fn store_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

#[async_trait]
impl WindowStore for RedisWindowStore {
    async fn admit_batch(
        &self,
        key: &str,
        entry: &WindowEntry,
        cutoff: WindowTimestamp,
        ttl: Duration,
    ) -> Result<u64, StoreError> {
        let key = self.key(key);
        let ttl_secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);
        let mut conn = self.connection.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg("-inf")
            .arg(cutoff.as_micros())
            .ignore()
            .zcard(&key)
            .zadd(&key, &entry.member, entry.timestamp.as_micros())
            .ignore()
            .expire(&key, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        tracing::trace!(key = %key, count, "window batch applied");
        Ok(count)
    }

    async fn retract(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.zrem::<_, _, ()>(self.key(key), member)
            .await
            .map_err(store_error)
    }

    async fn count(&self, key: &str, cutoff: WindowTimestamp) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        // Exclusive lower bound: entries at the cutoff are expired.
        conn.zcount(self.key(key), format!("({}", cutoff.as_micros()), "+inf")
            .await
            .map_err(store_error)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.key(key)).await.map_err(store_error)
    }
}
