use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::ErrorEvent;
use crate::search::SearchBody;

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Unexpected response from backend: {0}")]
    InvalidResponse(String),
}

/// Result of a relaxed bulk insert into the record store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    /// Documents the store accepted
    pub inserted: usize,
    /// Documents rejected individually (the rest of the batch still went in)
    pub failed: usize,
}

/// Result of one bulk request against the search index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkIndexReport {
    pub indexed: usize,
    pub failed: usize,
    /// Per-item error reasons, as reported by the index
    pub errors: Vec<String>,
}

/// A search hit: the store-assigned id plus the event itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(flatten)]
    pub event: ErrorEvent,
}

/// Raw search response, aggregations left in the index's own shape
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub total: u64,
    pub hits: Vec<SearchHit>,
    pub aggregations: Option<Value>,
}

/// Primary system of record for ingested events.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Unordered bulk insert. Per-document rejections are counted in the
    /// report; only a transport-level failure is an `Err`.
    async fn insert_many(&self, events: &[ErrorEvent]) -> Result<InsertReport, StorageError>;

    /// Count total documents in the store.
    async fn count(&self) -> Result<u64, StorageError>;
}

/// Search/analytics copy of the same events.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Index a whole batch in one bulk request.
    async fn bulk_index(&self, events: &[ErrorEvent]) -> Result<BulkIndexReport, StorageError>;

    async fn search(&self, body: &SearchBody) -> Result<SearchResponse, StorageError>;
}
