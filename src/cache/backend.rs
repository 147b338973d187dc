use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Key/value store with TTL, as used by [`super::CacheAside`].
///
/// Values are opaque strings (JSON in practice).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// `SET key value EX ttl_secs`
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key starting with `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    /// Drop every key in the cache database.
    async fn flush(&self) -> Result<(), CacheError>;
}
