//! One-shot seeding of the event stream from a JSON file.
//!
//! Seeding publishes to the stream (not directly to the stores) so seeded
//! events take the same ingestion path as live ones. It is skipped when the
//! record store already holds documents.

use std::path::Path;

use thiserror::Error;
use tracing::info;

use super::publisher::{EventPublisher, PublishError};
use crate::event::{ErrorEvent, EventError};
use crate::storage::{RecordStore, StorageError};

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("seed file is not a JSON array of events: {0}")]
    Format(String),
    #[error("seed event #{index} is invalid: {source}")]
    InvalidEvent {
        index: usize,
        #[source]
        source: EventError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The record store was not empty
    Skipped { existing: u64 },
    Published { count: usize },
}

/// Parse and validate a JSON array of events. Any invalid event rejects the file.
pub fn parse_events(bytes: &[u8]) -> Result<Vec<ErrorEvent>, SeedError> {
    let events: Vec<ErrorEvent> =
        serde_json::from_slice(bytes).map_err(|e| SeedError::Format(e.to_string()))?;
    for (index, event) in events.iter().enumerate() {
        event
            .validate()
            .map_err(|source| SeedError::InvalidEvent { index, source })?;
    }
    Ok(events)
}

pub async fn load_events_file(path: impl AsRef<Path>) -> Result<Vec<ErrorEvent>, SeedError> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    let events = parse_events(&bytes)?;
    info!(path = %path.as_ref().display(), count = events.len(), "Loaded seed events");
    Ok(events)
}

/// Publish `events` unless the record store already has data.
pub async fn seed_events(
    records: &dyn RecordStore,
    publisher: &dyn EventPublisher,
    events: &[ErrorEvent],
) -> Result<SeedOutcome, SeedError> {
    let existing = records.count().await?;
    if existing > 0 {
        info!(existing, "Record store already populated, skipping seed");
        return Ok(SeedOutcome::Skipped { existing });
    }

    let count = publisher.publish(events).await?;
    info!(count, "Published seed events");
    Ok(SeedOutcome::Published { count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::MemoryStream;
    use crate::storage::InMemoryRecordStore;

    const SEED: &str = r#"[
        {"timestamp":"2025-07-15T10:10:00Z","userId":"u1","browser":"Chrome","url":"/","errorMessage":"a","stackTrace":"s"},
        {"timestamp":"2025-07-15T10:11:00Z","userId":"u2","browser":"Safari","url":"/x","errorMessage":"b","stackTrace":"s"}
    ]"#;

    #[test]
    fn test_parse_events() {
        let events = parse_events(SEED.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].browser, "Safari");
    }

    #[test]
    fn test_parse_rejects_invalid_event() {
        let bad = SEED.replace("\"u2\"", "\"\"");
        assert!(matches!(
            parse_events(bad.as_bytes()),
            Err(SeedError::InvalidEvent { index: 1, .. })
        ));
        assert!(matches!(parse_events(b"{}"), Err(SeedError::Format(_))));
    }

    #[tokio::test]
    async fn test_seed_publishes_into_empty_store() {
        let records = InMemoryRecordStore::new();
        let stream = MemoryStream::new("error-events", 100);
        let events = parse_events(SEED.as_bytes()).unwrap();

        let outcome = seed_events(&records, &stream, &events).await.unwrap();
        assert_eq!(outcome, SeedOutcome::Published { count: 2 });
        assert_eq!(stream.len(0), 2);
    }

    #[tokio::test]
    async fn test_seed_skips_populated_store() {
        let records = InMemoryRecordStore::new();
        let events = parse_events(SEED.as_bytes()).unwrap();
        records.insert_many(&events[..1]).await.unwrap();

        let stream = MemoryStream::new("error-events", 100);
        let outcome = seed_events(&records, &stream, &events).await.unwrap();
        assert_eq!(outcome, SeedOutcome::Skipped { existing: 1 });
        assert_eq!(stream.len(0), 0);
    }
}
