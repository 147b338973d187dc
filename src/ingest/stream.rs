//! Event stream abstraction.
//!
//! The consumer only needs four things from a stream platform: the next
//! batch for one partition, a cursor commit, a rewind to redeliver a failed
//! batch, and a liveness signal. [`MemoryStream`] is the in-process
//! implementation used by tests and local runs; the Kafka one lives in
//! `ingest::kafka` behind the `kafka` feature.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use super::publisher::{EventPublisher, PublishError};
use crate::event::ErrorEvent;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream poll failed: {0}")]
    Poll(String),
    #[error("offset commit failed: {0}")]
    Commit(String),
    #[error("partition seek failed: {0}")]
    Seek(String),
    #[error("group coordinator error: {0}")]
    Coordinator(String),
}

/// One message as delivered by the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

/// Messages from a single partition, in offset order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBatch {
    pub topic: String,
    pub partition: i32,
    pub messages: Vec<RawMessage>,
}

impl RawBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn first_offset(&self) -> Option<i64> {
        self.messages.first().map(|m| m.offset)
    }

    #[must_use]
    pub fn last_offset(&self) -> Option<i64> {
        self.messages.last().map(|m| m.offset)
    }
}

#[async_trait]
pub trait EventStream: Send + Sync {
    /// Next batch from one partition, or `None` if nothing arrived in the poll window.
    async fn next_batch(&self) -> Result<Option<RawBatch>, StreamError>;

    /// Mark every message up to and including the batch's last offset as processed.
    async fn commit(&self, batch: &RawBatch) -> Result<(), StreamError>;

    /// Reposition the partition so the batch is delivered again.
    async fn rewind(&self, batch: &RawBatch) -> Result<(), StreamError>;

    /// Tell the group coordinator this consumer is alive.
    async fn heartbeat(&self) -> Result<(), StreamError>;
}

#[derive(Default)]
struct MemoryStreamState {
    log: BTreeMap<i32, Vec<RawMessage>>,
    /// Next offset to deliver, per partition
    positions: HashMap<i32, i64>,
    /// Last processed offset, per partition
    committed: HashMap<i32, i64>,
    heartbeats: u64,
    fail_next_poll: Option<StreamError>,
    fail_next_commit: Option<StreamError>,
}

/// In-process partitioned log.
pub struct MemoryStream {
    topic: String,
    max_batch: usize,
    state: Mutex<MemoryStreamState>,
}

impl MemoryStream {
    #[must_use]
    pub fn new(topic: impl Into<String>, max_batch: usize) -> Self {
        Self {
            topic: topic.into(),
            max_batch: max_batch.max(1),
            state: Mutex::new(MemoryStreamState::default()),
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Append a message; returns its offset.
    pub fn push(&self, partition: i32, payload: Option<Vec<u8>>) -> i64 {
        let mut state = self.state.lock();
        let log = state.log.entry(partition).or_default();
        let offset = log.len() as i64;
        log.push(RawMessage {
            partition,
            offset,
            key: None,
            payload,
        });
        offset
    }

    /// Append a JSON-encoded event to `partition`.
    pub fn push_event(&self, partition: i32, event: &ErrorEvent) -> Result<i64, PublishError> {
        let payload = serde_json::to_vec(event).map_err(|e| PublishError::Encode(e.to_string()))?;
        Ok(self.push(partition, Some(payload)))
    }

    #[must_use]
    pub fn committed(&self, partition: i32) -> Option<i64> {
        self.state.lock().committed.get(&partition).copied()
    }

    #[must_use]
    pub fn position(&self, partition: i32) -> i64 {
        self.state.lock().positions.get(&partition).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn heartbeats(&self) -> u64 {
        self.state.lock().heartbeats
    }

    /// Total messages in `partition`
    #[must_use]
    pub fn len(&self, partition: i32) -> usize {
        self.state.lock().log.get(&partition).map_or(0, Vec::len)
    }

    pub fn fail_next_poll(&self, error: StreamError) {
        self.state.lock().fail_next_poll = Some(error);
    }

    pub fn fail_next_commit(&self, error: StreamError) {
        self.state.lock().fail_next_commit = Some(error);
    }
}

#[async_trait]
impl EventStream for MemoryStream {
    async fn next_batch(&self) -> Result<Option<RawBatch>, StreamError> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next_poll.take() {
            return Err(err);
        }

        let MemoryStreamState { log, positions, .. } = &mut *state;
        for (partition, messages) in log.iter() {
            let position = positions.entry(*partition).or_insert(0);
            let start = usize::try_from(*position).unwrap_or(usize::MAX);
            if start >= messages.len() {
                continue;
            }
            let end = (start + self.max_batch).min(messages.len());
            let batch = messages[start..end].to_vec();
            *position = end as i64;
            return Ok(Some(RawBatch {
                topic: self.topic.clone(),
                partition: *partition,
                messages: batch,
            }));
        }
        Ok(None)
    }

    async fn commit(&self, batch: &RawBatch) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next_commit.take() {
            return Err(err);
        }
        if let Some(last) = batch.last_offset() {
            state.committed.insert(batch.partition, last);
        }
        Ok(())
    }

    async fn rewind(&self, batch: &RawBatch) -> Result<(), StreamError> {
        if let Some(first) = batch.first_offset() {
            self.state.lock().positions.insert(batch.partition, first);
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), StreamError> {
        self.state.lock().heartbeats += 1;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MemoryStream {
    async fn publish(&self, events: &[ErrorEvent]) -> Result<usize, PublishError> {
        for event in events {
            self.push_event(0, event)?;
        }
        Ok(events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_batches_respect_max_size() {
        let stream = MemoryStream::new("error-events", 2);
        for i in 0..5 {
            stream.push(0, Some(format!("{}", i).into_bytes()));
        }

        let first = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.first_offset(), Some(0));
        assert_eq!(first.last_offset(), Some(1));

        let second = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(second.first_offset(), Some(2));

        let third = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(third.len(), 1);
        assert!(stream.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rewind_redelivers() {
        let stream = MemoryStream::new("error-events", 10);
        stream.push(0, Some(b"a".to_vec()));
        stream.push(0, Some(b"b".to_vec()));

        let batch = stream.next_batch().await.unwrap().unwrap();
        assert!(stream.next_batch().await.unwrap().is_none());

        stream.rewind(&batch).await.unwrap();
        let again = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(again, batch);
    }

    #[tokio::test]
    async fn test_commit_records_last_offset() {
        let stream = MemoryStream::new("error-events", 10);
        stream.push(3, None);
        stream.push(3, None);
        let batch = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(batch.partition, 3);

        assert_eq!(stream.committed(3), None);
        stream.commit(&batch).await.unwrap();
        assert_eq!(stream.committed(3), Some(1));
    }

    #[tokio::test]
    async fn test_partitions_are_separate_batches() {
        let stream = MemoryStream::new("error-events", 10);
        stream.push(0, None);
        stream.push(1, None);
        stream.push(0, None);

        let a = stream.next_batch().await.unwrap().unwrap();
        let b = stream.next_batch().await.unwrap().unwrap();
        assert_eq!((a.partition, a.len()), (0, 2));
        assert_eq!((b.partition, b.len()), (1, 1));
    }

    #[tokio::test]
    async fn test_injected_failures_fire_once() {
        let stream = MemoryStream::new("error-events", 10);
        stream.fail_next_poll(StreamError::Poll("broker down".into()));
        assert!(stream.next_batch().await.is_err());
        assert!(stream.next_batch().await.unwrap().is_none());
    }
}
