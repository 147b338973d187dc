// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Service coordinator.
//!
//! [`ServiceContext`] owns every backend handle and hands out the two
//! halves of the service:
//! - the write side: a [`StreamConsumer`] over a caller-supplied stream
//! - the read side: a [`QueryService`] sharing the same cache
//!
//! # Lifecycle
//!
//! ```text
//! Ready → Running → ShuttingDown → Stopped
//! ```
//!
//! A context only exists once its backends are connected, so it starts in
//! `Ready`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use error_insights::{ServiceContext, ServiceState};
//! use error_insights::cache::InMemoryCache;
//! use error_insights::ingest::MemoryStream;
//! use error_insights::storage::{InMemoryRecordStore, InMemorySearchIndex};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let context = ServiceContext::new(
//!     Arc::new(InMemoryRecordStore::new()),
//!     Arc::new(InMemorySearchIndex::new()),
//!     Arc::new(InMemoryCache::new()),
//! );
//! assert_eq!(context.state(), ServiceState::Ready);
//!
//! let handle = context.spawn_consumer(Arc::new(MemoryStream::new("error-events", 100)));
//! context.shutdown().await;
//! let termination = handle.wait().await;
//! assert!(!termination.is_fatal());
//! # }
//! ```

mod lifecycle;
mod types;

pub use types::{ConsumerHandle, ContextError, ServiceState};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::cache::{CacheAside, CacheBackend};
use crate::ingest::{DualStoreWriter, EventStream, StreamConsumer};
use crate::resilience::retry::RetryConfig;
use crate::search::QueryService;
use crate::storage::{MongoRecordStore, RecordStore, SearchIndex};

/// Owns backend handles for the lifetime of the process.
pub struct ServiceContext {
    pub(super) records: Arc<dyn RecordStore>,
    pub(super) index: Arc<dyn SearchIndex>,
    pub(super) cache: Arc<CacheAside>,
    pub(super) query: Arc<QueryService>,

    /// Kept separately so shutdown can close the driver
    pub(super) mongo: Option<Arc<MongoRecordStore>>,

    pub(super) state: watch::Sender<ServiceState>,
    /// Stop signals of every consumer spawned from this context
    pub(super) consumers: Mutex<Vec<Arc<watch::Sender<bool>>>>,

    pub(super) consumer_retry: RetryConfig,
    pub(super) idle_delay: Duration,
}

impl ServiceContext {
    /// Build a context over already-connected backends. Starts in `Ready`.
    #[must_use]
    pub fn new(
        records: Arc<dyn RecordStore>,
        index: Arc<dyn SearchIndex>,
        cache_backend: Arc<dyn CacheBackend>,
    ) -> Self {
        let cache = Arc::new(CacheAside::new(cache_backend));
        let query = Arc::new(QueryService::new(index.clone(), cache.clone()));
        let (state, _) = watch::channel(ServiceState::Ready);

        Self {
            records,
            index,
            cache,
            query,
            mongo: None,
            state,
            consumers: Mutex::new(Vec::new()),
            consumer_retry: RetryConfig::consumer(),
            idle_delay: Duration::from_millis(100),
        }
    }

    /// Cache TTLs used by the query service.
    #[must_use]
    pub fn with_ttls(mut self, search_ttl: Duration, stats_ttl: Duration) -> Self {
        self.query = Arc::new(
            QueryService::new(self.index.clone(), self.cache.clone()).with_ttls(search_ttl, stats_ttl),
        );
        self
    }

    /// Backoff for consumers spawned from this context.
    #[must_use]
    pub fn with_consumer_retry(mut self, retry: RetryConfig) -> Self {
        self.consumer_retry = retry;
        self
    }

    #[must_use]
    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    #[must_use]
    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheAside> {
        &self.cache
    }

    #[must_use]
    pub fn query_service(&self) -> Arc<QueryService> {
        self.query.clone()
    }

    #[must_use]
    pub fn writer(&self) -> DualStoreWriter {
        DualStoreWriter::new(self.records.clone(), self.index.clone())
    }

    /// A consumer over `stream` wired to this context's stores and cache.
    #[must_use]
    pub fn consumer(&self, stream: Arc<dyn EventStream>) -> StreamConsumer {
        StreamConsumer::new(stream, self.writer(), self.cache.clone())
            .with_retry(self.consumer_retry.clone())
            .with_idle_delay(self.idle_delay)
    }
}
