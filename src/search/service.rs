//! Read side: filtered search pages and aggregate statistics, served
//! through the cache.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::aggregation::AggregationPlanner;
use super::filter::FilterCompiler;
use super::query_dsl::SearchBody;
use super::request::{SearchRequest, StatsRequest};
use super::response::{Pagination, SearchPage, SortInfo, StatsResponse};
use crate::cache::{CacheAside, SEARCH_NAMESPACE, STATS_NAMESPACE};
use crate::metrics::{self, LatencyTimer};
use crate::storage::{SearchIndex, StorageError};

pub const DEFAULT_SEARCH_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_STATS_TTL: Duration = Duration::from_secs(600);

#[derive(Error, Debug, Clone)]
pub enum QueryError {
    #[error("search index query failed: {0}")]
    Index(#[from] StorageError),
}

pub struct QueryService {
    index: Arc<dyn SearchIndex>,
    cache: Arc<CacheAside>,
    search_ttl: Duration,
    stats_ttl: Duration,
}

impl QueryService {
    #[must_use]
    pub fn new(index: Arc<dyn SearchIndex>, cache: Arc<CacheAside>) -> Self {
        Self {
            index,
            cache,
            search_ttl: DEFAULT_SEARCH_TTL,
            stats_ttl: DEFAULT_STATS_TTL,
        }
    }

    #[must_use]
    pub fn with_ttls(mut self, search_ttl: Duration, stats_ttl: Duration) -> Self {
        self.search_ttl = search_ttl;
        self.stats_ttl = stats_ttl;
        self
    }

    /// One page of matching events, newest first unless asked otherwise.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchPage, QueryError> {
        let params = request.cache_params();
        self.cache
            .get_or_compute(SEARCH_NAMESPACE, &params, self.search_ttl.as_secs(), || {
                self.search_uncached(request)
            })
            .await
    }

    async fn search_uncached(&self, request: &SearchRequest) -> Result<SearchPage, QueryError> {
        let _timer = LatencyTimer::new("search");
        let body = SearchBody::page(
            FilterCompiler::compile(&request.filter),
            request.offset,
            request.limit,
            request.sort_order,
        );

        let response = self.index.search(&body).await.map_err(|e| {
            warn!(error = %e, "Search query failed");
            metrics::record_query("search", "error");
            e
        })?;
        metrics::record_query("search", "ok");

        let returned = response.hits.len() as u64;
        debug!(total = response.total, returned, "Search query served from index");
        Ok(SearchPage {
            data: response.hits,
            pagination: Pagination::new(request.offset, request.limit, response.total, returned),
            sort: SortInfo::by_timestamp(request.sort_order),
        })
    }

    /// Summary, timeline and top-N breakdowns over matching events.
    pub async fn stats(&self, request: &StatsRequest) -> Result<StatsResponse, QueryError> {
        let params = request.cache_params();
        self.cache
            .get_or_compute(STATS_NAMESPACE, &params, self.stats_ttl.as_secs(), || {
                self.stats_uncached(request)
            })
            .await
    }

    async fn stats_uncached(&self, request: &StatsRequest) -> Result<StatsResponse, QueryError> {
        let _timer = LatencyTimer::new("stats");
        let plan = AggregationPlanner::plan(
            Some(i64::from(request.bucket_size)),
            request.interval,
            &request.normalized_aggregations(),
        );
        let body = SearchBody::stats(FilterCompiler::compile(&request.filter), plan);

        let response = self.index.search(&body).await.map_err(|e| {
            warn!(error = %e, "Stats query failed");
            metrics::record_query("stats", "error");
            e
        })?;
        metrics::record_query("stats", "ok");

        Ok(AggregationPlanner::format_result(
            response.total,
            response.aggregations.as_ref(),
        ))
    }
}
