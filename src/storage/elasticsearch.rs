//! Elasticsearch search index over the REST API.
//!
//! Writes go through the Bulk API as NDJSON; reads through `_search` with
//! a body rendered by [`QueryDslTranslator`].
//!
//! | Setting    | Description                               | Default                 |
//! |------------|-------------------------------------------|-------------------------|
//! | `url`      | Elasticsearch base URL                    | `http://localhost:9200` |
//! | `index`    | Target index name                         | `error-events`          |
//! | `username` | Basic auth user (optional)                | none                    |
//! | `refresh`  | Ask for immediate visibility after bulk   | `true`                  |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::traits::{BulkIndexReport, SearchHit, SearchIndex, SearchResponse, StorageError};
use crate::event::ErrorEvent;
use crate::search::{QueryDslTranslator, SearchBody};

/// Exact-match keyword sub-fields ignore values longer than this
pub const KEYWORD_IGNORE_ABOVE: u32 = 256;

#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    pub refresh: bool,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index: "error-events".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(10),
            refresh: true,
        }
    }
}

pub struct ElasticsearchIndex {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchIndex {
    pub fn new(config: ElasticsearchConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Backend(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(config, client))
    }

    /// Create with an injected reqwest client.
    #[must_use]
    pub fn with_client(config: ElasticsearchConfig, client: reqwest::Client) -> Self {
        Self { client, config }
    }

    #[must_use]
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.url.trim_end_matches('/'), path);
        let builder = self.client.request(method, url);
        match &self.config.username {
            Some(user) => builder.basic_auth(user, self.config.password.as_deref()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Value, StorageError> {
        let response = builder
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("Elasticsearch {} request failed: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(StorageError::Backend(format!(
                "Elasticsearch {} returned {}: {}",
                what, status, body_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(format!("failed to parse {} response: {}", what, e)))
    }

    /// Check the cluster is reachable.
    pub async fn ping(&self) -> Result<(), StorageError> {
        let info = self.send(self.request(Method::GET, ""), "ping").await?;
        debug!(
            cluster = info["cluster_name"].as_str().unwrap_or("unknown"),
            version = info["version"]["number"].as_str().unwrap_or("unknown"),
            "Elasticsearch reachable"
        );
        Ok(())
    }

    /// Settings and mappings the index is created with.
    #[must_use]
    pub fn index_definition() -> Value {
        let text_with_keyword = json!({
            "type": "text",
            "fields": {
                "keyword": { "type": "keyword", "ignore_above": KEYWORD_IGNORE_ABOVE }
            }
        });
        json!({
            "settings": {
                "number_of_shards": 1,
                "number_of_replicas": 1
            },
            "mappings": {
                "properties": {
                    "timestamp": { "type": "date" },
                    "userId": { "type": "keyword" },
                    "browser": { "type": "keyword" },
                    "url": text_with_keyword.clone(),
                    "errorMessage": text_with_keyword,
                    "stackTrace": { "type": "text" }
                }
            }
        })
    }

    /// Create the index with [`Self::index_definition`] if it doesn't exist.
    pub async fn ensure_index(&self) -> Result<(), StorageError> {
        let index = &self.config.index;
        let exists = self
            .request(Method::HEAD, index)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("Elasticsearch index check failed: {}", e)))?;

        match exists.status() {
            StatusCode::OK => {
                info!(index = %index, "Elasticsearch index already exists");
                return Ok(());
            }
            StatusCode::NOT_FOUND => {}
            status => {
                return Err(StorageError::Backend(format!(
                    "Elasticsearch index check returned {}",
                    status
                )))
            }
        }

        let response = self
            .request(Method::PUT, index)
            .json(&Self::index_definition())
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("Elasticsearch index create failed: {}", e)))?;

        if response.status().is_success() {
            info!(index = %index, "Elasticsearch index created");
            return Ok(());
        }

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();
        // Another instance won the race
        if body_text.contains("resource_already_exists_exception") {
            info!(index = %index, "Elasticsearch index created concurrently");
            return Ok(());
        }
        Err(StorageError::Backend(format!(
            "Elasticsearch index create returned {}: {}",
            status, body_text
        )))
    }

    /// Build the NDJSON body for a Bulk API request.
    ///
    /// ```text
    /// {"index":{"_index":"error-events"}}
    /// {"timestamp":"...","userId":"...",...}
    /// ```
    pub fn build_bulk_body(index: &str, events: &[ErrorEvent]) -> Result<String, StorageError> {
        let action = serde_json::to_string(&json!({ "index": { "_index": index } }))
            .map_err(|e| StorageError::Backend(format!("JSON write error: {}", e)))?;

        let mut body = String::new();
        for event in events {
            let doc = serde_json::to_string(event)
                .map_err(|e| StorageError::Backend(format!("JSON write error: {}", e)))?;
            body.push_str(&action);
            body.push('\n');
            body.push_str(&doc);
            body.push('\n');
        }
        Ok(body)
    }

    /// Count per-item results in a Bulk API response.
    #[must_use]
    pub fn parse_bulk_response(response: &Value, submitted: usize) -> BulkIndexReport {
        let Some(items) = response.get("items").and_then(Value::as_array) else {
            // No per-item detail; trust the top-level flag
            let failed = if response.get("errors") == Some(&Value::Bool(true)) {
                submitted
            } else {
                0
            };
            return BulkIndexReport {
                indexed: submitted - failed,
                failed,
                errors: Vec::new(),
            };
        };

        let mut errors = Vec::new();
        for item in items {
            let Some(error) = item.get("index").and_then(|op| op.get("error")) else {
                continue;
            };
            let reason = error
                .get("reason")
                .and_then(Value::as_str)
                .or_else(|| error.get("type").and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            errors.push(reason);
        }

        let failed = errors.len().min(submitted);
        BulkIndexReport {
            indexed: submitted - failed,
            failed,
            errors,
        }
    }

    /// `hits.total` is either a number or `{value, relation}` depending on version.
    #[must_use]
    pub fn total_hits(total: Option<&Value>) -> u64 {
        match total {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::Object(obj)) => obj.get("value").and_then(Value::as_u64).unwrap_or(0),
            _ => 0,
        }
    }

    /// Extract total, hits and raw aggregations from a `_search` response.
    pub fn parse_search_response(response: Value) -> Result<SearchResponse, StorageError> {
        let hits = response
            .get("hits")
            .ok_or_else(|| StorageError::InvalidResponse("search response has no hits".to_string()))?;

        let total = Self::total_hits(hits.get("total"));

        let mut parsed = Vec::new();
        for hit in hits.get("hits").and_then(Value::as_array).into_iter().flatten() {
            let id = hit.get("_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let source = hit.get("_source").cloned().unwrap_or(Value::Null);
            match serde_json::from_value::<ErrorEvent>(source) {
                Ok(event) => parsed.push(SearchHit { id, event }),
                Err(e) => warn!(id = %id, error = %e, "Skipping search hit with malformed source"),
            }
        }

        Ok(SearchResponse {
            total,
            hits: parsed,
            aggregations: response.get("aggregations").cloned(),
        })
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn bulk_index(&self, events: &[ErrorEvent]) -> Result<BulkIndexReport, StorageError> {
        if events.is_empty() {
            return Ok(BulkIndexReport::default());
        }

        let body = Self::build_bulk_body(&self.config.index, events)?;
        let refresh = if self.config.refresh { "true" } else { "false" };
        let builder = self
            .request(Method::POST, &format!("_bulk?refresh={}", refresh))
            .header("Content-Type", "application/x-ndjson")
            .body(body);

        let response = self.send(builder, "bulk").await?;
        let report = Self::parse_bulk_response(&response, events.len());

        if report.failed > 0 {
            warn!(
                index = %self.config.index,
                failed = report.failed,
                first_error = report.errors.first().map(String::as_str).unwrap_or(""),
                "Elasticsearch bulk response contained per-item errors"
            );
        }
        debug!(index = %self.config.index, indexed = report.indexed, "Bulk indexed events");

        Ok(report)
    }

    async fn search(&self, body: &SearchBody) -> Result<SearchResponse, StorageError> {
        let builder = self
            .request(Method::POST, &format!("{}/_search", self.config.index))
            .json(&QueryDslTranslator::translate(body));
        let response = self.send(builder, "search").await?;
        Self::parse_search_response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(i: usize) -> ErrorEvent {
        ErrorEvent {
            timestamp: "2025-07-15T10:10:00Z".to_string(),
            user_id: format!("u{}", i),
            browser: "Chrome".to_string(),
            url: "/home".to_string(),
            error_message: "boom".to_string(),
            stack_trace: "at main.js:1".to_string(),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ElasticsearchConfig::default();
        assert_eq!(config.url, "http://localhost:9200");
        assert_eq!(config.index, "error-events");
        assert!(config.refresh);
        assert!(config.username.is_none());
    }

    #[test]
    fn test_bulk_body_alternates_action_and_document() {
        let events = vec![sample_event(1), sample_event(2)];
        let body = ElasticsearchIndex::build_bulk_body("error-events", &events).unwrap();

        assert!(body.ends_with('\n'));
        let lines: Vec<&str> = body.trim_end().split('\n').collect();
        assert_eq!(lines.len(), 4);

        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action, json!({"index": {"_index": "error-events"}}));
        let doc: Value = serde_json::from_str(lines[3]).unwrap();
        assert_eq!(doc["userId"], "u2");
        assert_eq!(doc["errorMessage"], "boom");
    }

    #[test]
    fn test_parse_bulk_response_counts_item_errors() {
        let response = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 201}},
                {"index": {"_id": "2", "status": 201}},
                {"index": {"_id": "3", "status": 400, "error": {"type": "mapper_parsing_exception", "reason": "failed to parse field [timestamp]"}}},
                {"index": {"_id": "4", "status": 201}},
                {"index": {"_id": "5", "status": 201}}
            ]
        });
        let report = ElasticsearchIndex::parse_bulk_response(&response, 5);
        assert_eq!(report.indexed, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors, vec!["failed to parse field [timestamp]".to_string()]);
    }

    #[test]
    fn test_parse_bulk_response_without_items() {
        let ok = ElasticsearchIndex::parse_bulk_response(&json!({"errors": false}), 3);
        assert_eq!(ok.indexed, 3);
        let bad = ElasticsearchIndex::parse_bulk_response(&json!({"errors": true}), 3);
        assert_eq!(bad.failed, 3);
    }

    #[test]
    fn test_total_hits_shapes() {
        assert_eq!(ElasticsearchIndex::total_hits(Some(&json!(42))), 42);
        assert_eq!(
            ElasticsearchIndex::total_hits(Some(&json!({"value": 7, "relation": "eq"}))),
            7
        );
        assert_eq!(ElasticsearchIndex::total_hits(Some(&json!("lots"))), 0);
        assert_eq!(ElasticsearchIndex::total_hits(None), 0);
    }

    #[test]
    fn test_parse_search_response() {
        let response = json!({
            "hits": {
                "total": {"value": 2, "relation": "eq"},
                "hits": [
                    {"_id": "abc", "_source": serde_json::to_value(sample_event(1)).unwrap()},
                    {"_id": "bad", "_source": {"userId": "only"}}
                ]
            },
            "aggregations": {"unique_users": {"value": 1}}
        });
        let parsed = ElasticsearchIndex::parse_search_response(response).unwrap();
        assert_eq!(parsed.total, 2);
        assert_eq!(parsed.hits.len(), 1);
        assert_eq!(parsed.hits[0].id, "abc");
        assert_eq!(parsed.aggregations.unwrap()["unique_users"]["value"], 1);

        assert!(matches!(
            ElasticsearchIndex::parse_search_response(json!({"error": "x"})),
            Err(StorageError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_index_definition() {
        let def = ElasticsearchIndex::index_definition();
        assert_eq!(def["settings"]["number_of_shards"], 1);
        assert_eq!(def["settings"]["number_of_replicas"], 1);
        let props = &def["mappings"]["properties"];
        assert_eq!(props["timestamp"]["type"], "date");
        assert_eq!(props["userId"]["type"], "keyword");
        assert_eq!(props["url"]["fields"]["keyword"]["ignore_above"], 256);
        assert_eq!(props["errorMessage"]["type"], "text");
        assert!(props["stackTrace"].get("fields").is_none());
    }
}
