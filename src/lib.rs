//! # Error Insights
//!
//! Ingestion and query service for frontend error events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Event Stream                           │
//! │  • Partitioned log (Kafka, or MemoryStream in tests)       │
//! │  • Cursor committed only after both stores accept a batch  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (StreamConsumer batches)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DualStoreWriter                          │
//! │  • Record store (MongoDB): system of record                │
//! │  • Search index (Elasticsearch): filtering and facets      │
//! │  • Per-document rejections counted, not retried            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                 (invalidate search + stats namespaces)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CacheAside (Redis)                         │
//! │  • Read-through for search pages and stats                 │
//! │  • Fail-open: cache errors never fail a query              │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     QueryService                            │
//! │  • Filter → clauses → search index query                   │
//! │  • Aggregation plans: timeline, unique users, top-N        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-least-once. A crash between the store writes and the
//! cursor commit redelivers the batch, so both stores may hold duplicates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use error_insights::{ServiceConfig, ServiceContext};
//! use error_insights::search::{Filter, SearchRequest};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServiceConfig::from_env().expect("config");
//!     let context = ServiceContext::connect(&config).await.expect("backends");
//!
//!     let request = SearchRequest::new(Filter::new().with_browser("Safari"));
//!     let page = context.query_service().search(&request).await.unwrap();
//!     println!("{} matching events", page.pagination.total);
//!
//!     context.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`coordinator`]: [`ServiceContext`] wiring backends, consumers and queries
//! - [`ingest`]: stream abstraction, consumer, dual-store writer, seeding
//! - [`search`]: filters, aggregations, query DSL and the query service
//! - [`cache`]: key derivation and the cache-aside layer
//! - [`storage`]: record store and search index backends
//! - [`resilience`]: retry with exponential backoff

pub mod config;
pub mod event;
pub mod storage;
pub mod cache;
pub mod search;
pub mod ingest;
pub mod resilience;
pub mod coordinator;
pub mod metrics;

pub use config::{ConfigError, ServiceConfig};
pub use event::{ErrorEvent, EventError};
pub use coordinator::{ConsumerHandle, ContextError, ServiceContext, ServiceState};
pub use storage::traits::{RecordStore, SearchIndex, StorageError};
pub use cache::{CacheAside, CacheBackend, CacheError};
pub use search::{QueryError, QueryService, SearchRequest, StatsRequest};
pub use ingest::{DualStoreWriter, EventStream, StreamConsumer, Termination};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
