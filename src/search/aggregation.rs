//! Aggregation planner
//!
//! Plans the statistics facets requested by a stats query and maps the raw
//! search-engine aggregation output back into a fixed-shape [`StatsResponse`].
//!
//! ```text
//! kind          agg name       search-engine aggregation
//! timeline      timeline       date_histogram(timestamp, calendar_interval)
//! uniqueUsers   unique_users   cardinality(userId)
//! topErrors     top_errors     terms(errorMessage.keyword, size)
//! topUsers      top_users      terms(userId, size)
//! topBrowsers   top_browsers   terms(browser, size)
//! topUrls       top_urls       terms(url.keyword, size)
//! ```

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use super::response::{StatsResponse, Summary, TimelineBucket, TopItem};

pub const DEFAULT_BUCKET_SIZE: u32 = 20;
pub const MIN_BUCKET_SIZE: u32 = 1;
pub const MAX_BUCKET_SIZE: u32 = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregationParseError {
    #[error("unknown aggregation '{0}'")]
    UnknownKind(String),
    #[error("unknown interval '{0}' (expected hour, day, week or month)")]
    UnknownInterval(String),
}

/// The six supported statistics facets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregationKind {
    Timeline,
    UniqueUsers,
    TopErrors,
    TopUsers,
    TopBrowsers,
    TopUrls,
}

impl AggregationKind {
    pub const ALL: [AggregationKind; 6] = [
        AggregationKind::Timeline,
        AggregationKind::UniqueUsers,
        AggregationKind::TopErrors,
        AggregationKind::TopUsers,
        AggregationKind::TopBrowsers,
        AggregationKind::TopUrls,
    ];

    /// Public (request) name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::Timeline => "timeline",
            AggregationKind::UniqueUsers => "uniqueUsers",
            AggregationKind::TopErrors => "topErrors",
            AggregationKind::TopUsers => "topUsers",
            AggregationKind::TopBrowsers => "topBrowsers",
            AggregationKind::TopUrls => "topUrls",
        }
    }

    /// Name of the aggregation inside the search request body
    #[must_use]
    pub fn agg_name(&self) -> &'static str {
        match self {
            AggregationKind::Timeline => "timeline",
            AggregationKind::UniqueUsers => "unique_users",
            AggregationKind::TopErrors => "top_errors",
            AggregationKind::TopUsers => "top_users",
            AggregationKind::TopBrowsers => "top_browsers",
            AggregationKind::TopUrls => "top_urls",
        }
    }

    /// Index field the terms aggregation groups on (None for non-terms kinds)
    #[must_use]
    pub fn terms_field(&self) -> Option<&'static str> {
        match self {
            AggregationKind::TopErrors => Some("errorMessage.keyword"),
            AggregationKind::TopUsers => Some("userId"),
            AggregationKind::TopBrowsers => Some("browser"),
            AggregationKind::TopUrls => Some("url.keyword"),
            AggregationKind::Timeline | AggregationKind::UniqueUsers => None,
        }
    }
}

impl FromStr for AggregationKind {
    type Err = AggregationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AggregationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AggregationParseError::UnknownKind(s.to_string()))
    }
}

impl std::fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar interval for the timeline facet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInterval {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl TimeInterval {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInterval::Hour => "hour",
            TimeInterval::Day => "day",
            TimeInterval::Week => "week",
            TimeInterval::Month => "month",
        }
    }
}

impl FromStr for TimeInterval {
    type Err = AggregationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(TimeInterval::Hour),
            "day" => Ok(TimeInterval::Day),
            "week" => Ok(TimeInterval::Week),
            "month" => Ok(TimeInterval::Month),
            other => Err(AggregationParseError::UnknownInterval(other.to_string())),
        }
    }
}

/// Clamp a requested bucket size into `[1, 100]`, defaulting to 20.
#[must_use]
pub fn clamp_bucket_size(requested: Option<i64>) -> u32 {
    match requested {
        None => DEFAULT_BUCKET_SIZE,
        Some(size) => size.clamp(i64::from(MIN_BUCKET_SIZE), i64::from(MAX_BUCKET_SIZE)) as u32,
    }
}

/// Which facets to compute, and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationPlan {
    pub bucket_size: u32,
    pub interval: TimeInterval,
    pub kinds: BTreeSet<AggregationKind>,
}

impl AggregationPlan {
    #[must_use]
    pub fn contains(&self, kind: AggregationKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Render the plan as a search-engine `aggs` object.
    #[must_use]
    pub fn to_dsl(&self) -> Value {
        let mut aggs = Map::new();
        for kind in &self.kinds {
            let body = match kind {
                AggregationKind::Timeline => json!({
                    "date_histogram": {
                        "field": "timestamp",
                        "calendar_interval": self.interval.as_str(),
                    }
                }),
                AggregationKind::UniqueUsers => json!({
                    "cardinality": { "field": "userId" }
                }),
                terms => json!({
                    "terms": {
                        "field": terms.terms_field().unwrap_or_default(),
                        "size": self.bucket_size,
                    }
                }),
            };
            aggs.insert(kind.agg_name().to_string(), body);
        }
        Value::Object(aggs)
    }
}

/// Aggregation plan builder and result formatter
pub struct AggregationPlanner;

impl AggregationPlanner {
    /// Plan the requested facets; an empty request plans all six.
    #[must_use]
    pub fn plan(
        bucket_size: Option<i64>,
        interval: TimeInterval,
        requested: &[AggregationKind],
    ) -> AggregationPlan {
        let kinds = if requested.is_empty() {
            AggregationKind::ALL.into_iter().collect()
        } else {
            requested.iter().copied().collect()
        };

        AggregationPlan {
            bucket_size: clamp_bucket_size(bucket_size),
            interval,
            kinds,
        }
    }

    /// Map raw aggregation output into the fixed response shape.
    ///
    /// Absent facets become empty lists (or 0 unique users); malformed
    /// buckets are skipped rather than failing the response.
    #[must_use]
    pub fn format_result(total_events: u64, raw: Option<&Value>) -> StatsResponse {
        let agg = |kind: AggregationKind| raw.and_then(|r| r.get(kind.agg_name()));

        let timeline = buckets(agg(AggregationKind::Timeline))
            .filter_map(|bucket| {
                let count = bucket.get("doc_count")?.as_u64()?;
                let timestamp = bucket
                    .get("key_as_string")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| key_to_string(bucket.get("key")?))?;
                Some(TimelineBucket { timestamp, count })
            })
            .collect();

        let unique_users = agg(AggregationKind::UniqueUsers)
            .and_then(|v| v.get("value"))
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or(0);

        StatsResponse {
            summary: Summary {
                total_events,
                unique_users,
            },
            timeline,
            top_errors: top_items(agg(AggregationKind::TopErrors)),
            top_users: top_items(agg(AggregationKind::TopUsers)),
            top_browsers: top_items(agg(AggregationKind::TopBrowsers)),
            top_urls: top_items(agg(AggregationKind::TopUrls)),
        }
    }
}

fn buckets(agg: Option<&Value>) -> impl Iterator<Item = &Value> {
    agg.and_then(|a| a.get("buckets"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn key_to_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn top_items(agg: Option<&Value>) -> Vec<TopItem> {
    buckets(agg)
        .filter_map(|bucket| {
            Some(TopItem {
                value: key_to_string(bucket.get("key")?)?,
                count: bucket.get("doc_count")?.as_u64()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_defaults_to_all_kinds() {
        let plan = AggregationPlanner::plan(None, TimeInterval::Day, &[]);
        assert_eq!(plan.kinds.len(), 6);
        assert_eq!(plan.bucket_size, DEFAULT_BUCKET_SIZE);
    }

    #[test]
    fn test_plan_subset() {
        let plan = AggregationPlanner::plan(None, TimeInterval::Day, &[AggregationKind::TopErrors]);
        assert_eq!(plan.kinds.len(), 1);
        assert!(plan.contains(AggregationKind::TopErrors));

        let dsl = plan.to_dsl();
        let obj = dsl.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj.contains_key("top_errors"));
    }

    #[test]
    fn test_plan_collapses_duplicates_and_ignores_order() {
        let a = AggregationPlanner::plan(
            Some(5),
            TimeInterval::Hour,
            &[AggregationKind::TopUrls, AggregationKind::Timeline, AggregationKind::TopUrls],
        );
        let b = AggregationPlanner::plan(
            Some(5),
            TimeInterval::Hour,
            &[AggregationKind::Timeline, AggregationKind::TopUrls],
        );
        assert_eq!(a, b);
        assert_eq!(a.kinds.len(), 2);
    }

    #[test]
    fn test_bucket_size_clamped() {
        assert_eq!(AggregationPlanner::plan(Some(0), TimeInterval::Day, &[]).bucket_size, 1);
        assert_eq!(AggregationPlanner::plan(Some(500), TimeInterval::Day, &[]).bucket_size, 100);
        assert_eq!(AggregationPlanner::plan(Some(-3), TimeInterval::Day, &[]).bucket_size, 1);
        assert_eq!(AggregationPlanner::plan(Some(42), TimeInterval::Day, &[]).bucket_size, 42);
    }

    #[test]
    fn test_to_dsl_shapes() {
        let plan = AggregationPlanner::plan(Some(7), TimeInterval::Week, &[]);
        let dsl = plan.to_dsl();

        assert_eq!(
            dsl["timeline"],
            json!({"date_histogram": {"field": "timestamp", "calendar_interval": "week"}})
        );
        assert_eq!(dsl["unique_users"], json!({"cardinality": {"field": "userId"}}));
        assert_eq!(
            dsl["top_errors"],
            json!({"terms": {"field": "errorMessage.keyword", "size": 7}})
        );
        assert_eq!(dsl["top_users"]["terms"]["field"], "userId");
        assert_eq!(dsl["top_browsers"]["terms"]["field"], "browser");
        assert_eq!(dsl["top_urls"]["terms"]["field"], "url.keyword");
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("topErrors".parse::<AggregationKind>(), Ok(AggregationKind::TopErrors));
        assert_eq!("uniqueUsers".parse::<AggregationKind>(), Ok(AggregationKind::UniqueUsers));
        assert!(matches!(
            "top_errors".parse::<AggregationKind>(),
            Err(AggregationParseError::UnknownKind(_))
        ));
        assert_eq!("month".parse::<TimeInterval>(), Ok(TimeInterval::Month));
        assert!("year".parse::<TimeInterval>().is_err());
    }

    #[test]
    fn test_format_full_result() {
        let raw = json!({
            "timeline": {"buckets": [
                {"key": 1752537600000u64, "key_as_string": "2025-07-15T00:00:00.000Z", "doc_count": 3},
                {"key": 1752624000000u64, "doc_count": 1}
            ]},
            "unique_users": {"value": 2},
            "top_errors": {"buckets": [{"key": "boom", "doc_count": 4}]},
            "top_users": {"buckets": [{"key": "u1", "doc_count": 3}, {"key": "u2", "doc_count": 1}]},
            "top_browsers": {"buckets": [{"key": "Chrome", "doc_count": 4}]},
            "top_urls": {"buckets": [{"key": "/home", "doc_count": 4}]}
        });

        let stats = AggregationPlanner::format_result(4, Some(&raw));
        assert_eq!(stats.summary.total_events, 4);
        assert_eq!(stats.summary.unique_users, 2);
        assert_eq!(stats.timeline.len(), 2);
        assert_eq!(stats.timeline[0].timestamp, "2025-07-15T00:00:00.000Z");
        assert_eq!(stats.timeline[1].timestamp, "1752624000000");
        assert_eq!(stats.top_errors, vec![TopItem { value: "boom".into(), count: 4 }]);
        assert_eq!(stats.top_users.len(), 2);
        assert_eq!(stats.top_browsers[0].value, "Chrome");
        assert_eq!(stats.top_urls[0].count, 4);
    }

    #[test]
    fn test_format_missing_aggregations_default_empty() {
        let stats = AggregationPlanner::format_result(10, None);
        assert_eq!(stats.summary.total_events, 10);
        assert_eq!(stats.summary.unique_users, 0);
        assert!(stats.timeline.is_empty());
        assert!(stats.top_errors.is_empty());
        assert!(stats.top_urls.is_empty());

        let partial = json!({"top_users": {"buckets": []}});
        let stats = AggregationPlanner::format_result(0, Some(&partial));
        assert!(stats.top_users.is_empty());
        assert!(stats.timeline.is_empty());
    }

    #[test]
    fn test_format_skips_malformed_buckets() {
        let raw = json!({
            "top_errors": {"buckets": [
                {"key": "ok", "doc_count": 1},
                {"doc_count": 2},
                {"key": {"nested": true}, "doc_count": 3},
                "garbage"
            ]},
            "timeline": {"buckets": "not-a-list"},
            "unique_users": {"value": "many"}
        });
        let stats = AggregationPlanner::format_result(1, Some(&raw));
        assert_eq!(stats.top_errors.len(), 1);
        assert!(stats.timeline.is_empty());
        assert_eq!(stats.summary.unique_users, 0);
    }
}
