//! Redis cache backend.
//!
//! Plain string values with `SET .. EX`. Namespace sweeps use incremental
//! `SCAN MATCH <prefix>*` so a large keyspace never blocks the server the way
//! `KEYS` would.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, AsyncCommands, Client};
use tracing::{debug, info};

use super::backend::{CacheBackend, CacheError};
use crate::resilience::retry::{retry, RetryConfig};

/// Keys requested per SCAN round trip
const SCAN_COUNT: usize = 500;

pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    /// Connect with the startup retry preset (fails after a few attempts).
    pub async fn connect(connection_string: &str) -> Result<Self, CacheError> {
        let client = Client::open(connection_string)
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| CacheError::Backend(e.to_string()))?;

        info!("Connected to Redis cache");
        Ok(Self { connection })
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Escape glob metacharacters so a prefix matches literally.
    #[must_use]
    pub fn escape_glob(raw: &str) -> String {
        let mut escaped = String::with_capacity(raw.len());
        for c in raw.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        conn.get(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        // EX 0 is rejected by Redis
        conn.set_ex::<_, _, ()>(key, value, ttl_secs.max(1))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", Self::escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut deleted = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;

            if !keys.is_empty() {
                let removed: usize = conn
                    .del(&keys)
                    .await
                    .map_err(|e| CacheError::Backend(e.to_string()))?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %pattern, deleted, "Swept cache keys");
        Ok(deleted)
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}
