//! In-memory record store and search index.
//!
//! Used by tests and local runs. The search index evaluates clauses directly
//! (exact equality, case-insensitive token containment for free text, ISO-8601
//! ranges) and emits aggregations in the same raw shape Elasticsearch does, so
//! the formatting path is shared.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, SecondsFormat, Timelike, Utc};
use dashmap::DashMap;
use serde_json::{json, Map, Value};

use super::traits::{
    BulkIndexReport, InsertReport, RecordStore, SearchHit, SearchIndex, SearchResponse,
    StorageError,
};
use crate::event::{parse_timestamp, ErrorEvent};
use crate::search::{AggregationKind, AggregationPlan, Clause, EventField, SearchBody, SortOrder, TimeInterval};

/// Keyword sub-fields ignore values longer than this
const KEYWORD_IGNORE_ABOVE: usize = 256;

pub struct InMemoryRecordStore {
    data: DashMap<u64, ErrorEvent>,
    next_id: AtomicU64,
}

impl InMemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Get current document count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Snapshot of stored events in insertion order
    #[must_use]
    pub fn events(&self) -> Vec<ErrorEvent> {
        let mut entries: Vec<(u64, ErrorEvent)> = self
            .data
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, event)| event).collect()
    }

    pub fn clear(&self) {
        self.data.clear();
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert_many(&self, events: &[ErrorEvent]) -> Result<InsertReport, StorageError> {
        for event in events {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.data.insert(id, event.clone());
        }
        Ok(InsertReport {
            inserted: events.len(),
            failed: 0,
        })
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.data.len() as u64)
    }
}

pub struct InMemorySearchIndex {
    docs: DashMap<String, ErrorEvent>,
    next_id: AtomicU64,
}

impl InMemorySearchIndex {
    #[must_use]
    pub fn new() -> Self {
        Self {
            docs: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn clear(&self) {
        self.docs.clear();
    }

    fn matches(event: &ErrorEvent, clauses: &[Clause]) -> bool {
        clauses.iter().all(|clause| match clause {
            Clause::Exact { field, value } => field_value(event, *field) == value.as_str(),
            Clause::MultiMatch { query, fields } => {
                let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
                fields.iter().any(|field| {
                    let haystack = field_value(event, *field).to_lowercase();
                    tokens.iter().any(|token| haystack.contains(token.as_str()))
                })
            }
            Clause::Range { field, gte, lte } => {
                let Some(value) = parse_timestamp(field_value(event, *field)) else {
                    return false;
                };
                let lower_ok = gte
                    .as_deref()
                    .and_then(parse_timestamp)
                    .map_or(true, |lower| value >= lower);
                let upper_ok = lte
                    .as_deref()
                    .and_then(parse_timestamp)
                    .map_or(true, |upper| value <= upper);
                lower_ok && upper_ok
            }
        })
    }

    fn aggregate(hits: &[SearchHit], plan: &AggregationPlan) -> Value {
        let mut aggs = Map::new();
        for kind in &plan.kinds {
            let result = match kind {
                AggregationKind::Timeline => timeline(hits, plan.interval),
                AggregationKind::UniqueUsers => {
                    let users: HashSet<&str> = hits.iter().map(|h| h.event.user_id.as_str()).collect();
                    json!({ "value": users.len() })
                }
                AggregationKind::TopErrors => terms(hits, EventField::ErrorMessage, true, plan.bucket_size),
                AggregationKind::TopUsers => terms(hits, EventField::UserId, false, plan.bucket_size),
                AggregationKind::TopBrowsers => terms(hits, EventField::Browser, false, plan.bucket_size),
                AggregationKind::TopUrls => terms(hits, EventField::Url, true, plan.bucket_size),
            };
            aggs.insert(kind.agg_name().to_string(), result);
        }
        Value::Object(aggs)
    }
}

impl Default for InMemorySearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn bulk_index(&self, events: &[ErrorEvent]) -> Result<BulkIndexReport, StorageError> {
        for event in events {
            let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
            self.docs.insert(id, event.clone());
        }
        Ok(BulkIndexReport {
            indexed: events.len(),
            failed: 0,
            errors: Vec::new(),
        })
    }

    async fn search(&self, body: &SearchBody) -> Result<SearchResponse, StorageError> {
        let mut hits: Vec<SearchHit> = self
            .docs
            .iter()
            .filter(|r| Self::matches(r.value(), &body.clauses))
            .map(|r| SearchHit {
                id: r.key().clone(),
                event: r.value().clone(),
            })
            .collect();

        let total = hits.len() as u64;
        let aggregations = body.aggregations.as_ref().map(|plan| Self::aggregate(&hits, plan));

        let order = body.sort.unwrap_or_default();
        hits.sort_by(|a, b| {
            let by_time = parse_timestamp(&a.event.timestamp)
                .cmp(&parse_timestamp(&b.event.timestamp))
                .then_with(|| a.id.cmp(&b.id));
            match order {
                SortOrder::Asc => by_time,
                SortOrder::Desc => by_time.reverse(),
            }
        });

        let page = hits
            .into_iter()
            .skip(usize::try_from(body.from).unwrap_or(usize::MAX))
            .take(usize::try_from(body.size).unwrap_or(usize::MAX))
            .collect();

        Ok(SearchResponse {
            total,
            hits: page,
            aggregations,
        })
    }
}

fn field_value(event: &ErrorEvent, field: EventField) -> &str {
    match field {
        EventField::Timestamp => &event.timestamp,
        EventField::UserId => &event.user_id,
        EventField::Browser => &event.browser,
        EventField::Url => &event.url,
        EventField::ErrorMessage => &event.error_message,
        EventField::StackTrace => &event.stack_trace,
    }
}

/// Start of the calendar bucket containing `ts` (weeks start on Monday).
fn bucket_start(ts: DateTime<Utc>, interval: TimeInterval) -> Option<DateTime<Utc>> {
    let date = ts.date_naive();
    let start = match interval {
        TimeInterval::Hour => date.and_hms_opt(ts.hour(), 0, 0)?,
        TimeInterval::Day => date.and_hms_opt(0, 0, 0)?,
        TimeInterval::Week => date
            .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))?
            .and_hms_opt(0, 0, 0)?,
        TimeInterval::Month => date.with_day(1)?.and_hms_opt(0, 0, 0)?,
    };
    Some(start.and_utc())
}

fn timeline(hits: &[SearchHit], interval: TimeInterval) -> Value {
    let mut counts: BTreeMap<DateTime<Utc>, u64> = BTreeMap::new();
    for hit in hits {
        if let Some(start) = parse_timestamp(&hit.event.timestamp).and_then(|ts| bucket_start(ts, interval)) {
            *counts.entry(start).or_default() += 1;
        }
    }
    let buckets: Vec<Value> = counts
        .into_iter()
        .map(|(start, count)| {
            json!({
                "key": start.timestamp_millis(),
                "key_as_string": start.to_rfc3339_opts(SecondsFormat::Millis, true),
                "doc_count": count,
            })
        })
        .collect();
    json!({ "buckets": buckets })
}

fn terms(hits: &[SearchHit], field: EventField, keyword_subfield: bool, size: u32) -> Value {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for hit in hits {
        let value = field_value(&hit.event, field);
        if keyword_subfield && value.chars().count() > KEYWORD_IGNORE_ABOVE {
            continue;
        }
        *counts.entry(value).or_default() += 1;
    }
    let mut ranked: Vec<(&str, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let buckets: Vec<Value> = ranked
        .into_iter()
        .take(size as usize)
        .map(|(key, count)| json!({ "key": key, "doc_count": count }))
        .collect();
    json!({ "buckets": buckets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{AggregationPlanner, Filter, FilterCompiler};

    fn event(ts: &str, user: &str, browser: &str, url: &str, msg: &str) -> ErrorEvent {
        ErrorEvent {
            timestamp: ts.to_string(),
            user_id: user.to_string(),
            browser: browser.to_string(),
            url: url.to_string(),
            error_message: msg.to_string(),
            stack_trace: format!("at {}:1", url),
        }
    }

    async fn seeded_index() -> InMemorySearchIndex {
        let index = InMemorySearchIndex::new();
        index
            .bulk_index(&[
                event("2025-07-14T09:00:00Z", "u1", "Chrome", "/home", "TypeError: x is undefined"),
                event("2025-07-15T10:10:00Z", "u1", "Firefox", "/checkout", "ReferenceError: y"),
                event("2025-07-15T11:30:00Z", "u2", "Chrome", "/home", "TypeError: x is undefined"),
                event("2025-08-01T00:00:00Z", "u3", "Safari", "/cart", "NetworkError"),
            ])
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_record_store_insert_and_count() {
        let store = InMemoryRecordStore::new();
        assert!(store.is_empty());

        let report = store
            .insert_many(&[
                event("2025-07-15T10:10:00Z", "u1", "Chrome", "/", "a"),
                event("2025-07-15T10:11:00Z", "u2", "Chrome", "/", "b"),
            ])
            .await
            .unwrap();
        assert_eq!(report, InsertReport { inserted: 2, failed: 0 });
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.events()[1].user_id, "u2");

        store.clear();
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_match_all_sorted_desc() {
        let index = seeded_index().await;
        let resp = index
            .search(&SearchBody::page(vec![], 0, 10, SortOrder::Desc))
            .await
            .unwrap();
        assert_eq!(resp.total, 4);
        assert_eq!(resp.hits[0].event.timestamp, "2025-08-01T00:00:00Z");
        assert_eq!(resp.hits[3].event.timestamp, "2025-07-14T09:00:00Z");
    }

    #[tokio::test]
    async fn test_pagination_window() {
        let index = seeded_index().await;
        let resp = index
            .search(&SearchBody::page(vec![], 3, 2, SortOrder::Asc))
            .await
            .unwrap();
        assert_eq!(resp.total, 4);
        assert_eq!(resp.hits.len(), 1);
    }

    #[tokio::test]
    async fn test_filter_clauses() {
        let index = seeded_index().await;

        let clauses = FilterCompiler::compile(&Filter::new().with_user_id("u1").with_browser("Chrome"));
        let resp = index.search(&SearchBody::page(clauses, 0, 10, SortOrder::Desc)).await.unwrap();
        assert_eq!(resp.total, 1);

        let clauses = FilterCompiler::compile(&Filter::new().with_query("typeerror"));
        let resp = index.search(&SearchBody::page(clauses, 0, 10, SortOrder::Desc)).await.unwrap();
        assert_eq!(resp.total, 2);

        let clauses = FilterCompiler::compile(
            &Filter::new()
                .with_date_start("2025-07-15T00:00:00Z")
                .with_date_end("2025-07-15T10:10:00Z"),
        );
        let resp = index.search(&SearchBody::page(clauses, 0, 10, SortOrder::Desc)).await.unwrap();
        assert_eq!(resp.total, 1);
        assert_eq!(resp.hits[0].event.user_id, "u1");
    }

    #[tokio::test]
    async fn test_aggregations_raw_shape() {
        let index = seeded_index().await;
        let plan = AggregationPlanner::plan(Some(1), TimeInterval::Day, &[]);
        let resp = index.search(&SearchBody::stats(vec![], plan)).await.unwrap();

        assert!(resp.hits.is_empty());
        let aggs = resp.aggregations.unwrap();
        assert_eq!(aggs["unique_users"]["value"], 3);
        assert_eq!(aggs["timeline"]["buckets"].as_array().unwrap().len(), 3);
        assert_eq!(aggs["timeline"]["buckets"][1]["key_as_string"], "2025-07-15T00:00:00.000Z");
        assert_eq!(aggs["timeline"]["buckets"][1]["doc_count"], 2);

        let top_errors = aggs["top_errors"]["buckets"].as_array().unwrap();
        assert_eq!(top_errors.len(), 1);
        assert_eq!(top_errors[0]["key"], "TypeError: x is undefined");
        assert_eq!(top_errors[0]["doc_count"], 2);
    }

    #[test]
    fn test_bucket_start_week_and_month() {
        // 2025-07-17 is a Thursday
        let ts = parse_timestamp("2025-07-17T15:45:00Z").unwrap();
        assert_eq!(
            bucket_start(ts, TimeInterval::Week).unwrap(),
            parse_timestamp("2025-07-14T00:00:00Z").unwrap()
        );
        assert_eq!(
            bucket_start(ts, TimeInterval::Month).unwrap(),
            parse_timestamp("2025-07-01T00:00:00Z").unwrap()
        );
        assert_eq!(
            bucket_start(ts, TimeInterval::Hour).unwrap(),
            parse_timestamp("2025-07-17T15:00:00Z").unwrap()
        );
    }
}
