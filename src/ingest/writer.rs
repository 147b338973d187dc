//! Dual-store batch writer.
//!
//! Writes a validated batch to the record store, then to the search index.
//! A transport failure from either call fails the batch. Documents rejected
//! individually inside an otherwise successful bulk call do not: they are
//! logged, counted, and reported in [`WriteReport`], and the two stores may
//! diverge by those documents.

use std::sync::Arc;

use tracing::{debug, warn};

use super::consumer::IngestError;
use crate::event::ErrorEvent;
use crate::metrics;
use crate::storage::{BulkIndexReport, InsertReport, RecordStore, SearchIndex};

/// What each store accepted for one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub events: usize,
    pub records: InsertReport,
    pub index: BulkIndexReport,
}

impl WriteReport {
    /// True when either store dropped documents the other may hold
    #[must_use]
    pub fn has_partial_failures(&self) -> bool {
        self.records.failed > 0 || self.index.failed > 0
    }
}

#[derive(Clone)]
pub struct DualStoreWriter {
    records: Arc<dyn RecordStore>,
    index: Arc<dyn SearchIndex>,
}

impl DualStoreWriter {
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore>, index: Arc<dyn SearchIndex>) -> Self {
        Self { records, index }
    }

    pub async fn write(&self, events: &[ErrorEvent]) -> Result<WriteReport, IngestError> {
        let records = self.records.insert_many(events).await?;
        metrics::record_events_written("records", records.inserted);
        if records.failed > 0 {
            warn!(
                failed = records.failed,
                inserted = records.inserted,
                "Record store rejected some documents"
            );
            metrics::record_partial_failures("records", records.failed);
        }

        let index = self.index.bulk_index(events).await?;
        metrics::record_events_written("index", index.indexed);
        if index.failed > 0 {
            warn!(
                failed = index.failed,
                indexed = index.indexed,
                first_error = index.errors.first().map(String::as_str).unwrap_or(""),
                "Search index rejected some documents"
            );
            metrics::record_partial_failures("index", index.failed);
        }

        debug!(
            events = events.len(),
            inserted = records.inserted,
            indexed = index.indexed,
            "Batch written to both stores"
        );

        Ok(WriteReport {
            events: events.len(),
            records,
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InMemoryRecordStore, InMemorySearchIndex, StorageError};
    use async_trait::async_trait;

    fn events(n: usize) -> Vec<ErrorEvent> {
        (0..n)
            .map(|i| ErrorEvent {
                timestamp: "2025-07-15T10:10:00Z".into(),
                user_id: format!("u{}", i),
                browser: "Chrome".into(),
                url: "/".into(),
                error_message: "boom".into(),
                stack_trace: "at x".into(),
            })
            .collect()
    }

    struct DownRecords;

    #[async_trait]
    impl RecordStore for DownRecords {
        async fn insert_many(&self, _events: &[ErrorEvent]) -> Result<InsertReport, StorageError> {
            Err(StorageError::Backend("server selection timeout".into()))
        }
        async fn count(&self) -> Result<u64, StorageError> {
            Err(StorageError::Backend("server selection timeout".into()))
        }
    }

    #[tokio::test]
    async fn test_writes_both_stores() {
        let records = Arc::new(InMemoryRecordStore::new());
        let index = Arc::new(InMemorySearchIndex::new());
        let writer = DualStoreWriter::new(records.clone(), index.clone());

        let report = writer.write(&events(3)).await.unwrap();
        assert_eq!(report.events, 3);
        assert_eq!(report.records.inserted, 3);
        assert_eq!(report.index.indexed, 3);
        assert!(!report.has_partial_failures());
        assert_eq!(records.len(), 3);
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_record_transport_failure_skips_index() {
        let index = Arc::new(InMemorySearchIndex::new());
        let writer = DualStoreWriter::new(Arc::new(DownRecords), index.clone());

        let result = writer.write(&events(2)).await;
        assert!(matches!(result, Err(IngestError::Write(_))));
        assert!(index.is_empty());
    }
}
