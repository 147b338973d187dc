//! Search and stats request parameters.
//!
//! Requests arrive as raw query-string pairs; parsing applies the defaults and
//! clamps, rejects malformed values, and produces the parameter set the
//! cache key is derived from.

use serde::Serialize;
use thiserror::Error;

use super::aggregation::{
    clamp_bucket_size, AggregationKind, AggregationParseError, TimeInterval, DEFAULT_BUCKET_SIZE,
};
use super::filter::Filter;
use super::query_dsl::SortOrder;
use crate::event::parse_timestamp;

pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("{field} must be a valid number, got '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("{field} must be an ISO-8601 datetime, got '{value}'")]
    InvalidDate { field: &'static str, value: String },
    #[error("invalid sortOrder: {0}")]
    InvalidSortOrder(String),
    #[error(transparent)]
    InvalidAggregation(#[from] AggregationParseError),
}

/// Clamp a page size into `[1, 100]`
#[must_use]
pub fn clamp_limit(limit: u64) -> u64 {
    limit.clamp(1, MAX_LIMIT)
}

fn parse_count(field: &'static str, value: &str) -> Result<u64, RequestError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RequestError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }
    // Digits only, so the only possible failure is overflow.
    Ok(value.parse::<u64>().unwrap_or(u64::MAX))
}

/// Apply one filter field from a query pair; returns false when `key` isn't a filter field.
fn apply_filter_pair(filter: &mut Filter, key: &str, value: &str) -> Result<bool, RequestError> {
    let slot = match key {
        "userId" => &mut filter.user_id,
        "url" => &mut filter.url,
        "browser" => &mut filter.browser,
        "query" => &mut filter.query,
        "dateStart" | "dateEnd" => {
            let field = if key == "dateStart" { "dateStart" } else { "dateEnd" };
            if !value.is_empty() && parse_timestamp(value).is_none() {
                return Err(RequestError::InvalidDate {
                    field,
                    value: value.to_string(),
                });
            }
            if key == "dateStart" {
                &mut filter.date_start
            } else {
                &mut filter.date_end
            }
        }
        _ => return Ok(false),
    };
    *slot = Some(value.to_string());
    Ok(true)
}

/// A paginated search over error events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub filter: Filter,
    pub offset: u64,
    pub limit: u64,
    pub sort_order: SortOrder,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self::new(Filter::default())
    }
}

impl SearchRequest {
    #[must_use]
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            offset: 0,
            limit: DEFAULT_LIMIT,
            sort_order: SortOrder::default(),
        }
    }

    /// Set the page window; `limit` is clamped to `[1, 100]`.
    #[must_use]
    pub fn with_page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = clamp_limit(limit);
        self
    }

    #[must_use]
    pub fn with_sort(mut self, order: SortOrder) -> Self {
        self.sort_order = order;
        self
    }

    /// Parse from query-string pairs. Unknown keys are ignored.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Result<Self, RequestError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "offset" => request.offset = parse_count("offset", value)?,
                "limit" => request.limit = clamp_limit(parse_count("limit", value)?),
                "sortOrder" => {
                    request.sort_order = value.parse().map_err(RequestError::InvalidSortOrder)?
                }
                _ => {
                    apply_filter_pair(&mut request.filter, key, value)?;
                }
            }
        }
        Ok(request)
    }

    /// Parameter set the cache key is derived from
    #[must_use]
    pub fn cache_params(&self) -> SearchCacheParams<'_> {
        SearchCacheParams {
            filter: &self.filter,
            offset: self.offset,
            limit: self.limit,
            sort_order: self.sort_order,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCacheParams<'a> {
    #[serde(flatten)]
    pub filter: &'a Filter,
    pub offset: u64,
    pub limit: u64,
    pub sort_order: SortOrder,
}

/// An aggregate statistics request over error events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsRequest {
    pub filter: Filter,
    pub bucket_size: u32,
    pub interval: TimeInterval,
    /// Requested facets; empty means all of them
    pub aggregations: Vec<AggregationKind>,
}

impl Default for StatsRequest {
    fn default() -> Self {
        Self::new(Filter::default())
    }
}

impl StatsRequest {
    #[must_use]
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            bucket_size: DEFAULT_BUCKET_SIZE,
            interval: TimeInterval::default(),
            aggregations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_bucket_size(mut self, size: i64) -> Self {
        self.bucket_size = clamp_bucket_size(Some(size));
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: TimeInterval) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_aggregations(mut self, kinds: impl IntoIterator<Item = AggregationKind>) -> Self {
        self.aggregations = kinds.into_iter().collect();
        self
    }

    /// Parse from query-string pairs. `aggregations` is comma-separated.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Result<Self, RequestError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "bucketSize" => {
                    let size = parse_count("bucketSize", value)?;
                    request.bucket_size = clamp_bucket_size(Some(i64::try_from(size).unwrap_or(i64::MAX)));
                }
                "interval" => request.interval = value.parse()?,
                "aggregations" => {
                    request.aggregations = value
                        .split(',')
                        .map(str::trim)
                        .filter(|kind| !kind.is_empty())
                        .map(str::parse)
                        .collect::<Result<_, _>>()?;
                }
                _ => {
                    apply_filter_pair(&mut request.filter, key, value)?;
                }
            }
        }
        Ok(request)
    }

    /// Requested facets, deduplicated and in a canonical order
    #[must_use]
    pub fn normalized_aggregations(&self) -> Vec<AggregationKind> {
        let mut kinds = self.aggregations.clone();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Parameter set the cache key is derived from
    #[must_use]
    pub fn cache_params(&self) -> StatsCacheParams<'_> {
        let kinds = self.normalized_aggregations();
        StatsCacheParams {
            filter: &self.filter,
            interval: self.interval,
            bucket_size: self.bucket_size,
            aggregations: if kinds.is_empty() { None } else { Some(kinds) },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsCacheParams<'a> {
    #[serde(flatten)]
    pub filter: &'a Filter,
    pub interval: TimeInterval,
    pub bucket_size: u32,
    pub aggregations: Option<Vec<AggregationKind>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_defaults() {
        let req = SearchRequest::from_query_pairs(Vec::<(&str, &str)>::new()).unwrap();
        assert_eq!(req.offset, 0);
        assert_eq!(req.limit, 10);
        assert_eq!(req.sort_order, SortOrder::Desc);
        assert!(req.filter.is_empty());
    }

    #[test]
    fn test_search_limit_clamped() {
        let req = SearchRequest::from_query_pairs([("limit", "0")]).unwrap();
        assert_eq!(req.limit, 1);
        let req = SearchRequest::from_query_pairs([("limit", "500")]).unwrap();
        assert_eq!(req.limit, 100);
        let req = SearchRequest::from_query_pairs([("limit", "99999999999999999999999")]).unwrap();
        assert_eq!(req.limit, 100);
    }

    #[test]
    fn test_search_rejects_bad_numbers() {
        assert!(matches!(
            SearchRequest::from_query_pairs([("offset", "-1")]),
            Err(RequestError::InvalidNumber { field: "offset", .. })
        ));
        assert!(matches!(
            SearchRequest::from_query_pairs([("limit", "ten")]),
            Err(RequestError::InvalidNumber { field: "limit", .. })
        ));
    }

    #[test]
    fn test_search_sort_order() {
        let req = SearchRequest::from_query_pairs([("sortOrder", "asc")]).unwrap();
        assert_eq!(req.sort_order, SortOrder::Asc);
        assert!(matches!(
            SearchRequest::from_query_pairs([("sortOrder", "sideways")]),
            Err(RequestError::InvalidSortOrder(_))
        ));
    }

    #[test]
    fn test_search_filters_and_dates() {
        let req = SearchRequest::from_query_pairs([
            ("userId", "u1"),
            ("browser", "Safari"),
            ("dateStart", "2025-07-15T10:10:00Z"),
            ("unrelated", "ignored"),
        ])
        .unwrap();
        assert_eq!(req.filter.user_id.as_deref(), Some("u1"));
        assert_eq!(req.filter.browser.as_deref(), Some("Safari"));
        assert_eq!(req.filter.date_start.as_deref(), Some("2025-07-15T10:10:00Z"));

        assert!(matches!(
            SearchRequest::from_query_pairs([("dateEnd", "2025-13-45")]),
            Err(RequestError::InvalidDate { field: "dateEnd", .. })
        ));
    }

    #[test]
    fn test_stats_defaults() {
        let req = StatsRequest::from_query_pairs(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(req.bucket_size, 20);
        assert_eq!(req.interval, TimeInterval::Day);
        assert!(req.aggregations.is_empty());
    }

    #[test]
    fn test_stats_aggregation_list() {
        let req = StatsRequest::from_query_pairs([
            ("aggregations", "topErrors, timeline ,topErrors"),
            ("bucketSize", "500"),
            ("interval", "hour"),
        ])
        .unwrap();
        assert_eq!(req.bucket_size, 100);
        assert_eq!(req.interval, TimeInterval::Hour);
        assert_eq!(
            req.normalized_aggregations(),
            vec![AggregationKind::Timeline, AggregationKind::TopErrors]
        );

        assert!(matches!(
            StatsRequest::from_query_pairs([("aggregations", "topErrors,everything")]),
            Err(RequestError::InvalidAggregation(AggregationParseError::UnknownKind(_)))
        ));
        assert!(StatsRequest::from_query_pairs([("interval", "fortnight")]).is_err());
    }

    #[test]
    fn test_cache_params_shape() {
        let req = SearchRequest::new(Filter::new().with_user_id("u1")).with_page(20, 10);
        let value = serde_json::to_value(req.cache_params()).unwrap();
        assert_eq!(value["userId"], "u1");
        assert!(value["url"].is_null());
        assert_eq!(value["offset"], 20);
        assert_eq!(value["limit"], 10);
        assert_eq!(value["sortOrder"], "desc");

        let stats = StatsRequest::default();
        let value = serde_json::to_value(stats.cache_params()).unwrap();
        assert_eq!(value["interval"], "day");
        assert_eq!(value["bucketSize"], 20);
        assert!(value["aggregations"].is_null());
    }
}
