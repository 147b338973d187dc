// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache-aside port for the read path.
//!
//! Check the cache, compute on miss, populate. The cache is advisory: any
//! cache failure (unreachable backend, undecodable entry, failed write) is
//! logged and counted, and the request falls through to `compute`. Only
//! errors from `compute` itself reach the caller.
//!
//! # Concurrency
//!
//! There is no request coalescing. Concurrent misses on the same key each run
//! `compute` and each write the result; the last write wins.
//!
//! # Example
//!
//! ```rust
//! # use std::sync::Arc;
//! # use error_insights::cache::{CacheAside, InMemoryCache};
//! # use serde_json::json;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = CacheAside::new(Arc::new(InMemoryCache::new()));
//! let params = json!({"userId": "u1"});
//!
//! let first: Result<u64, std::io::Error> =
//!     cache.get_or_compute("search", &params, 300, || async { Ok(42) }).await;
//! let second: Result<u64, std::io::Error> =
//!     cache.get_or_compute("search", &params, 300, || async { Ok(0) }).await;
//!
//! assert_eq!(first.unwrap(), 42);
//! assert_eq!(second.unwrap(), 42); // served from cache
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::backend::CacheBackend;
use super::key::derive_key;
use crate::metrics;

/// Namespace for cached search pages
pub const SEARCH_NAMESPACE: &str = "search";
/// Namespace for cached statistics
pub const STATS_NAMESPACE: &str = "stats";

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Swallowed backend/encoding failures
    pub errors: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

pub struct CacheAside {
    backend: Arc<dyn CacheBackend>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheAside {
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// The backend this port writes through
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    fn record_error(&self, operation: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_error(operation);
    }

    /// Return the cached value for `(namespace, params)`, or compute and cache it.
    pub async fn get_or_compute<T, P, F, Fut, E>(
        &self,
        namespace: &str,
        params: &P,
        ttl_secs: u64,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = match derive_key(namespace, params) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(namespace, error = %e, "Cache key derivation failed, bypassing cache");
                self.record_error("key");
                None
            }
        };

        if let Some(key) = key.as_deref() {
            match self.backend.get(key).await {
                Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                    Ok(value) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        metrics::record_cache(namespace, "hit");
                        debug!(key, "Cache hit");
                        return Ok(value);
                    }
                    Err(e) => {
                        warn!(key, error = %e, "Undecodable cache entry, recomputing");
                        self.record_error("decode");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(key, error = %e, "Cache read failed, falling through");
                    self.record_error("read");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache(namespace, "miss");

        let value = compute().await?;

        if let Some(key) = key.as_deref() {
            match serde_json::to_string(&value) {
                Ok(raw) => {
                    if let Err(e) = self.backend.set_ex(key, &raw, ttl_secs).await {
                        warn!(key, error = %e, "Cache write failed");
                        self.record_error("write");
                    }
                }
                Err(e) => {
                    warn!(key, error = %e, "Cache value encoding failed");
                    self.record_error("encode");
                }
            }
        }

        Ok(value)
    }

    /// Drop the single entry for `(namespace, params)`.
    pub async fn invalidate<P: Serialize + ?Sized>(&self, namespace: &str, params: &P) {
        let key = match derive_key(namespace, params) {
            Ok(key) => key,
            Err(e) => {
                warn!(namespace, error = %e, "Cache key derivation failed");
                self.record_error("key");
                return;
            }
        };
        if let Err(e) = self.backend.delete(&key).await {
            warn!(key = %key, error = %e, "Cache delete failed");
            self.record_error("delete");
        }
    }

    /// Drop every entry in `namespace`.
    pub async fn invalidate_namespace(&self, namespace: &str) {
        match self.backend.delete_prefix(&format!("{}:", namespace)).await {
            Ok(count) => {
                metrics::record_cache_invalidated(namespace, count);
                if count > 0 {
                    info!(namespace, count, "Invalidated cache namespace");
                } else {
                    debug!(namespace, "No cached entries to invalidate");
                }
            }
            Err(e) => {
                warn!(namespace, error = %e, "Cache namespace invalidation failed");
                self.record_error("invalidate");
            }
        }
    }

    /// Flush the whole cache database.
    pub async fn clear_all(&self) {
        match self.backend.flush().await {
            Ok(()) => info!("Cache cleared"),
            Err(e) => {
                warn!(error = %e, "Cache flush failed");
                self.record_error("flush");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::CacheError;
    use crate::cache::InMemoryCache;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Backend whose reads always fail; counts write attempts
    #[derive(Default)]
    struct BrokenReads {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl CacheBackend for BrokenReads {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl: u64) -> Result<(), CacheError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
        async fn flush(&self) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_miss_computes_once_then_hits() {
        let cache = CacheAside::new(Arc::new(InMemoryCache::new()));
        let calls = AtomicUsize::new(0);
        let params = json!({"offset": 0, "limit": 10});

        for _ in 0..3 {
            let value: Result<String, std::convert::Infallible> = cache
                .get_or_compute(SEARCH_NAMESPACE, &params, 60, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("page".to_string())
                })
                .await;
            assert_eq!(value.unwrap(), "page");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_rejected_ttl_still_returns_computed_value() {
        let cache = CacheAside::new(Arc::new(InMemoryCache::new()));

        let value: Result<u32, std::convert::Infallible> = cache
            .get_or_compute(SEARCH_NAMESPACE, &json!({}), u64::MAX, || async { Ok(5) })
            .await;

        assert_eq!(value.unwrap(), 5);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_read_error_falls_through_and_still_writes() {
        let backend = Arc::new(BrokenReads::default());
        let cache = CacheAside::new(backend.clone());
        let calls = AtomicUsize::new(0);

        let value: Result<u32, std::convert::Infallible> = cache
            .get_or_compute(STATS_NAMESPACE, &json!({"interval": "day"}), 60, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;

        assert_eq!(value.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().errors, 2);
    }

    #[tokio::test]
    async fn test_compute_error_propagates_and_is_not_cached() {
        let backend = Arc::new(InMemoryCache::new());
        let cache = CacheAside::new(backend.clone());

        let result: Result<u32, String> = cache
            .get_or_compute(SEARCH_NAMESPACE, &json!({}), 60, || async {
                Err("index unavailable".to_string())
            })
            .await;

        assert_eq!(result.unwrap_err(), "index unavailable");
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_entry_recomputes() {
        let backend = Arc::new(InMemoryCache::new());
        let cache = CacheAside::new(backend.clone());
        let params = json!({"q": 1});
        let key = derive_key(SEARCH_NAMESPACE, &params).unwrap();
        backend.set_ex(&key, "not json", 60).await.unwrap();

        let value: Result<u32, std::convert::Infallible> = cache
            .get_or_compute(SEARCH_NAMESPACE, &params, 60, || async { Ok(5) })
            .await;
        assert_eq!(value.unwrap(), 5);
        assert_eq!(backend.get(&key).await.unwrap().as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_invalidate_single_and_namespace() {
        let backend = Arc::new(InMemoryCache::new());
        let cache = CacheAside::new(backend.clone());

        for i in 0..3 {
            let _: Result<u32, std::convert::Infallible> = cache
                .get_or_compute(SEARCH_NAMESPACE, &json!({"offset": i}), 60, || async { Ok(1) })
                .await;
        }
        let _: Result<u32, std::convert::Infallible> = cache
            .get_or_compute(STATS_NAMESPACE, &json!({}), 60, || async { Ok(1) })
            .await;
        assert_eq!(backend.len(), 4);

        cache.invalidate(SEARCH_NAMESPACE, &json!({"offset": 0})).await;
        assert_eq!(backend.len(), 3);

        cache.invalidate_namespace(SEARCH_NAMESPACE).await;
        assert_eq!(backend.len(), 1);

        cache.clear_all().await;
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_mutations_swallow_errors() {
        let cache = CacheAside::new(Arc::new(BrokenReads::default()));
        cache.invalidate(SEARCH_NAMESPACE, &json!({})).await;
        cache.invalidate_namespace(STATS_NAMESPACE).await;
        cache.clear_all().await;
        assert_eq!(cache.stats().errors, 3);
    }
}
