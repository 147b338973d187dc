//! Response shapes returned by the query service.
//!
//! All of these are cached as JSON, so they round-trip through serde.

use serde::{Deserialize, Serialize};

use super::query_dsl::SortOrder;
use crate::storage::SearchHit;

/// Field every search page is sorted on
pub const SORT_FIELD: &str = "timestamp";

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub data: Vec<SearchHit>,
    pub pagination: Pagination,
    pub sort: SortInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
    pub total: u64,
    pub has_more: bool,
    /// Hits actually present in this page
    pub returned: u64,
}

impl Pagination {
    #[must_use]
    pub fn new(offset: u64, limit: u64, total: u64, returned: u64) -> Self {
        Self {
            offset,
            limit,
            total,
            has_more: offset.saturating_add(limit) < total,
            returned,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortInfo {
    pub field: String,
    pub order: SortOrder,
}

impl SortInfo {
    #[must_use]
    pub fn by_timestamp(order: SortOrder) -> Self {
        Self {
            field: SORT_FIELD.to_string(),
            order,
        }
    }
}

/// Statistics over the filtered event set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub summary: Summary,
    pub timeline: Vec<TimelineBucket>,
    pub top_errors: Vec<TopItem>,
    pub top_users: Vec<TopItem>,
    pub top_browsers: Vec<TopItem>,
    pub top_urls: Vec<TopItem>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_events: u64,
    pub unique_users: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineBucket {
    pub timestamp: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopItem {
    pub value: String,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_more_boundaries() {
        let last_page = Pagination::new(80, 20, 100, 20);
        assert!(!last_page.has_more);
        assert_eq!(last_page.returned, 20);

        assert!(Pagination::new(79, 20, 100, 20).has_more);
        assert!(!Pagination::new(0, 10, 0, 0).has_more);
        assert!(!Pagination::new(95, 10, 100, 5).has_more);
        assert!(!Pagination::new(u64::MAX, 10, 100, 0).has_more);
    }

    #[test]
    fn test_pagination_serializes_camel_case() {
        let value = serde_json::to_value(Pagination::new(0, 10, 25, 10)).unwrap();
        assert_eq!(
            value,
            json!({"offset": 0, "limit": 10, "total": 25, "hasMore": true, "returned": 10})
        );
    }

    #[test]
    fn test_stats_response_shape() {
        let value = serde_json::to_value(StatsResponse::default()).unwrap();
        assert_eq!(
            value,
            json!({
                "summary": {"totalEvents": 0, "uniqueUsers": 0},
                "timeline": [],
                "topErrors": [],
                "topUsers": [],
                "topBrowsers": [],
                "topUrls": []
            })
        );
    }

    #[test]
    fn test_sort_info() {
        let value = serde_json::to_value(SortInfo::by_timestamp(SortOrder::Asc)).unwrap();
        assert_eq!(value, json!({"field": "timestamp", "order": "asc"}));
    }
}
