// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search and statistics over ingested error events.
//!
//! # Architecture
//!
//! ```text
//! SearchRequest / StatsRequest  (query-string parsing, clamps)
//!     ↓
//! FilterCompiler → Vec<Clause>   (exact / multi-match / range)
//! AggregationPlanner → AggregationPlan
//!     ↓
//! SearchBody ──→ SearchIndex::search
//!     ├─→ ElasticsearchIndex (QueryDslTranslator → JSON DSL)
//!     └─→ InMemorySearchIndex (evaluates clauses directly)
//!     ↓
//! SearchPage / StatsResponse   (cached via CacheAside)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use error_insights::cache::{CacheAside, InMemoryCache};
//! # use error_insights::search::{Filter, QueryService, SearchRequest};
//! # use error_insights::storage::InMemorySearchIndex;
//! # async fn example() {
//! let service = QueryService::new(
//!     Arc::new(InMemorySearchIndex::new()),
//!     Arc::new(CacheAside::new(Arc::new(InMemoryCache::new()))),
//! );
//!
//! let request = SearchRequest::new(Filter::new().with_browser("Chrome").with_query("timeout"));
//! let page = service.search(&request).await.unwrap();
//! println!("{} of {}", page.pagination.returned, page.pagination.total);
//! # }
//! ```

pub mod aggregation;
pub mod filter;
pub mod query_dsl;
pub mod request;
pub mod response;
pub mod service;

pub use aggregation::{
    AggregationKind, AggregationParseError, AggregationPlan, AggregationPlanner, TimeInterval,
};
pub use filter::{Clause, EventField, Filter, FilterCompiler, FREE_TEXT_FIELDS};
pub use query_dsl::{QueryDslTranslator, SearchBody, SortOrder};
pub use request::{RequestError, SearchRequest, StatsRequest};
pub use response::{
    Pagination, SearchPage, SortInfo, StatsResponse, Summary, TimelineBucket, TopItem,
};
pub use service::{QueryError, QueryService};
