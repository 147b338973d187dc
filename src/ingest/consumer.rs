// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stream consumer: batch validation, dual-store write, cache invalidation,
//! cursor commit.
//!
//! # Batch lifecycle
//!
//! ```text
//! Idle → Fetching → Validating → Writing → Invalidating → Committing → Idle
//!                                   │
//!                                   └─ write failure → rewind → Idle (batch redelivered)
//! stream failure → Terminated
//! ```
//!
//! Delivery is at-least-once. The cursor only moves after both stores
//! accepted the batch, so a crash between write and commit redelivers the
//! batch and the stores receive duplicates. Nothing deduplicates them.
//!
//! Within a partition batches are strictly sequential: the next poll only
//! happens after the previous batch's commit decision.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::stream::{EventStream, RawBatch, StreamError};
use super::writer::{DualStoreWriter, WriteReport};
use crate::cache::{CacheAside, SEARCH_NAMESPACE, STATS_NAMESPACE};
use crate::event::{ErrorEvent, EventError};
use crate::metrics;
use crate::resilience::retry::RetryConfig;
use crate::storage::StorageError;

#[derive(Error, Debug, Clone)]
pub enum IngestError {
    /// A store call failed at the transport level; the batch is redelivered
    #[error("batch write failed: {0}")]
    Write(#[from] StorageError),
    /// The stream itself failed; the run loop cannot continue
    #[error("stream failure: {0}")]
    Stream(#[from] StreamError),
}

/// Consumer state, observable through [`StreamConsumer::state_receiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Fetching,
    Validating,
    Writing,
    Invalidating,
    Committing,
    Terminated,
}

impl ConsumerState {
    fn as_gauge(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Fetching => 1,
            Self::Validating => 2,
            Self::Writing => 3,
            Self::Invalidating => 4,
            Self::Committing => 5,
            Self::Terminated => 6,
        }
    }
}

impl std::fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Fetching => write!(f, "Fetching"),
            Self::Validating => write!(f, "Validating"),
            Self::Writing => write!(f, "Writing"),
            Self::Invalidating => write!(f, "Invalidating"),
            Self::Committing => write!(f, "Committing"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Result of processing one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Written, caches invalidated, cursor advanced to `last_offset`
    Committed {
        written: usize,
        dropped: usize,
        last_offset: i64,
        report: WriteReport,
    },
    /// No valid events; nothing written, cursor untouched
    Skipped { dropped: usize },
}

/// Why the run loop stopped.
#[derive(Debug, Clone)]
pub enum Termination {
    /// Shutdown was requested
    Shutdown,
    /// Unrecoverable error; the supervisor decides what happens next
    Fatal(IngestError),
    /// The consumer task panicked
    Panicked(String),
}

impl Termination {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Termination::Shutdown)
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutdown => write!(f, "shutdown requested"),
            Self::Fatal(e) => write!(f, "fatal: {}", e),
            Self::Panicked(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

pub struct StreamConsumer {
    stream: Arc<dyn EventStream>,
    writer: DualStoreWriter,
    cache: Arc<CacheAside>,
    retry: RetryConfig,
    idle_delay: Duration,
    state: watch::Sender<ConsumerState>,
}

impl StreamConsumer {
    #[must_use]
    pub fn new(stream: Arc<dyn EventStream>, writer: DualStoreWriter, cache: Arc<CacheAside>) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            stream,
            writer,
            cache,
            retry: RetryConfig::consumer(),
            idle_delay: Duration::from_millis(100),
            state,
        }
    }

    /// Backoff applied between redeliveries of a failed batch.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Pause after a poll window that returned nothing.
    #[must_use]
    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    #[must_use]
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
        metrics::set_consumer_state(state.as_gauge());
    }

    /// Parse every message; bad ones are dropped individually.
    fn validate(batch: &RawBatch) -> (Vec<ErrorEvent>, usize) {
        let mut events = Vec::with_capacity(batch.len());
        let mut dropped = 0;

        for message in &batch.messages {
            let parsed = match message.payload.as_deref() {
                Some(payload) => ErrorEvent::from_payload(payload),
                None => Err(EventError::EmptyPayload),
            };
            match parsed {
                Ok(event) => events.push(event),
                Err(e) => {
                    dropped += 1;
                    let reason = match e {
                        EventError::EmptyPayload => "empty",
                        EventError::Malformed(_) => "malformed",
                        EventError::EmptyField(_) | EventError::InvalidTimestamp(_) => "invalid",
                    };
                    metrics::record_dropped_messages(reason, 1);
                    warn!(
                        partition = message.partition,
                        offset = message.offset,
                        error = %e,
                        "Dropping unparseable message"
                    );
                }
            }
        }

        (events, dropped)
    }

    /// Process one batch end to end.
    ///
    /// On a write failure the stream is rewound to the batch's first offset
    /// and the error returned; nothing is committed.
    pub async fn process_batch(&self, batch: &RawBatch) -> Result<BatchOutcome, IngestError> {
        debug!(partition = batch.partition, messages = batch.len(), "Processing batch");
        metrics::record_batch_size(batch.len());

        self.set_state(ConsumerState::Validating);
        let (events, dropped) = Self::validate(batch);

        let Some(last_offset) = batch.last_offset().filter(|_| !events.is_empty()) else {
            debug!(partition = batch.partition, dropped, "No valid events in batch");
            metrics::record_batch("skipped");
            self.set_state(ConsumerState::Idle);
            return Ok(BatchOutcome::Skipped { dropped });
        };

        self.set_state(ConsumerState::Writing);
        let report = match self.writer.write(&events).await {
            Ok(report) => report,
            Err(e) => {
                metrics::record_batch("failed");
                self.set_state(ConsumerState::Idle);
                self.stream.rewind(batch).await?;
                return Err(e);
            }
        };
        metrics::record_batch_bytes(events.iter().map(ErrorEvent::size_bytes).sum());

        self.set_state(ConsumerState::Invalidating);
        tokio::join!(
            self.cache.invalidate_namespace(SEARCH_NAMESPACE),
            self.cache.invalidate_namespace(STATS_NAMESPACE),
        );

        self.set_state(ConsumerState::Committing);
        self.stream.commit(batch).await?;
        self.stream.heartbeat().await?;

        metrics::record_batch("committed");
        self.set_state(ConsumerState::Idle);
        info!(
            partition = batch.partition,
            written = events.len(),
            dropped,
            last_offset,
            "Batch committed"
        );

        Ok(BatchOutcome::Committed {
            written: events.len(),
            dropped,
            last_offset,
            report,
        })
    }

    /// Waits for `delay` unless shutdown is signalled first; returns true on shutdown.
    async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = shutdown.changed() => true,
        }
    }

    /// Poll and process batches until shutdown or a fatal error.
    ///
    /// Write failures back off per the retry config and the batch is
    /// redelivered. Stream failures end the loop with [`Termination::Fatal`].
    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Termination {
        info!("Stream consumer started");
        let mut backoff = self.retry.backoff();

        let termination = loop {
            if *shutdown.borrow() {
                break Termination::Shutdown;
            }

            self.set_state(ConsumerState::Fetching);
            let polled = tokio::select! {
                biased;
                _ = shutdown.changed() => break Termination::Shutdown,
                polled = self.stream.next_batch() => polled,
            };

            let batch = match polled {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    self.set_state(ConsumerState::Idle);
                    if Self::pause(self.idle_delay, &mut shutdown).await {
                        break Termination::Shutdown;
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Stream poll failed");
                    break Termination::Fatal(e.into());
                }
            };

            match self.process_batch(&batch).await {
                Ok(_) => backoff.reset(),
                Err(IngestError::Write(e)) => {
                    let delay = backoff.next_delay();
                    if backoff.exhausted() {
                        error!(error = %e, attempts = backoff.attempts(), "Batch write retries exhausted");
                        break Termination::Fatal(IngestError::Write(e));
                    }
                    warn!(
                        partition = batch.partition,
                        first_offset = batch.first_offset(),
                        attempt = backoff.attempts(),
                        error = %e,
                        "Batch write failed, will redeliver in {:?}",
                        delay
                    );
                    if Self::pause(delay, &mut shutdown).await {
                        break Termination::Shutdown;
                    }
                }
                Err(e @ IngestError::Stream(_)) => {
                    error!(error = %e, "Stream failure while processing batch");
                    break Termination::Fatal(e);
                }
            }
        };

        self.set_state(ConsumerState::Terminated);
        info!(termination = %termination, "Stream consumer stopped");
        termination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, InMemoryCache};
    use crate::ingest::MemoryStream;
    use crate::storage::{InMemoryRecordStore, InMemorySearchIndex};

    fn payload(user: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "timestamp": "2025-07-15T10:10:00Z",
            "userId": user,
            "browser": "Chrome",
            "url": "/home",
            "errorMessage": "boom",
            "stackTrace": "at main.js:1"
        }))
        .unwrap()
    }

    struct Fixture {
        stream: Arc<MemoryStream>,
        records: Arc<InMemoryRecordStore>,
        cache: Arc<InMemoryCache>,
        consumer: StreamConsumer,
    }

    fn fixture() -> Fixture {
        let stream = Arc::new(MemoryStream::new("error-events", 100));
        let records = Arc::new(InMemoryRecordStore::new());
        let index = Arc::new(InMemorySearchIndex::new());
        let cache = Arc::new(InMemoryCache::new());
        let consumer = StreamConsumer::new(
            stream.clone(),
            DualStoreWriter::new(records.clone(), index),
            Arc::new(CacheAside::new(cache.clone())),
        )
        .with_retry(RetryConfig::test())
        .with_idle_delay(Duration::from_millis(1));
        Fixture {
            stream,
            records,
            cache,
            consumer,
        }
    }

    #[tokio::test]
    async fn test_bad_message_dropped_cursor_reaches_last() {
        let f = fixture();
        f.stream.push(0, Some(payload("u1")));
        f.stream.push(0, Some(b"{not json".to_vec()));
        f.stream.push(0, Some(payload("u2")));

        let batch = f.stream.next_batch().await.unwrap().unwrap();
        let outcome = f.consumer.process_batch(&batch).await.unwrap();

        assert!(matches!(
            outcome,
            BatchOutcome::Committed { written: 2, dropped: 1, last_offset: 2, .. }
        ));
        assert_eq!(f.records.len(), 2);
        assert_eq!(f.stream.committed(0), Some(2));
        assert_eq!(f.stream.heartbeats(), 1);
        assert_eq!(f.consumer.state(), ConsumerState::Idle);
    }

    #[tokio::test]
    async fn test_all_invalid_batch_is_skipped() {
        let f = fixture();
        f.stream.push(0, None);
        f.stream.push(0, Some(b"garbage".to_vec()));

        let batch = f.stream.next_batch().await.unwrap().unwrap();
        let outcome = f.consumer.process_batch(&batch).await.unwrap();

        assert_eq!(outcome, BatchOutcome::Skipped { dropped: 2 });
        assert_eq!(f.stream.committed(0), None);
        assert_eq!(f.stream.heartbeats(), 0);
        assert!(f.records.is_empty());
    }

    #[tokio::test]
    async fn test_zone_less_timestamps_are_written() {
        let f = fixture();
        for ts in ["2025-07-15T10:10:00", "2025-07-15T10:10:00.000", "2025-07-15"] {
            let mut event: serde_json::Value = serde_json::from_slice(&payload("u1")).unwrap();
            event["timestamp"] = serde_json::json!(ts);
            f.stream.push(0, Some(serde_json::to_vec(&event).unwrap()));
        }

        let batch = f.stream.next_batch().await.unwrap().unwrap();
        let outcome = f.consumer.process_batch(&batch).await.unwrap();

        assert!(matches!(
            outcome,
            BatchOutcome::Committed { written: 3, dropped: 0, last_offset: 2, .. }
        ));
        assert_eq!(f.records.len(), 3);
    }

    #[tokio::test]
    async fn test_success_invalidates_both_namespaces() {
        let f = fixture();
        f.cache.set_ex("search:aaaa", "1", 60).await.unwrap();
        f.cache.set_ex("stats:bbbb", "1", 60).await.unwrap();
        f.cache.set_ex("other:cccc", "1", 60).await.unwrap();

        f.stream.push(0, Some(payload("u1")));
        let batch = f.stream.next_batch().await.unwrap().unwrap();
        f.consumer.process_batch(&batch).await.unwrap();

        assert_eq!(f.cache.keys(), vec!["other:cccc".to_string()]);
    }

    #[tokio::test]
    async fn test_commit_failure_surfaces_as_stream_error() {
        let f = fixture();
        f.stream.fail_next_commit(StreamError::Commit("rebalance in progress".into()));
        f.stream.push(0, Some(payload("u1")));

        let batch = f.stream.next_batch().await.unwrap().unwrap();
        let result = f.consumer.process_batch(&batch).await;
        assert!(matches!(result, Err(IngestError::Stream(StreamError::Commit(_)))));
        assert_eq!(f.stream.committed(0), None);
    }

    #[tokio::test]
    async fn test_run_drains_then_stops_on_shutdown() {
        let f = fixture();
        for user in ["u1", "u2", "u3"] {
            f.stream.push(0, Some(payload(user)));
        }

        let (tx, rx) = watch::channel(false);
        let mut state_rx = f.consumer.state_receiver();
        let stream = f.stream.clone();

        let run = f.consumer.run(rx);
        let stop = async {
            while stream.committed(0) != Some(2) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tx.send(true).unwrap();
        };
        let (termination, _) = tokio::join!(run, stop);

        assert!(matches!(termination, Termination::Shutdown));
        assert!(!termination.is_fatal());
        assert_eq!(f.records.len(), 3);
        assert_eq!(*state_rx.borrow_and_update(), ConsumerState::Terminated);
    }

    #[tokio::test]
    async fn test_run_poll_failure_is_fatal() {
        let f = fixture();
        f.stream.fail_next_poll(StreamError::Coordinator("group fenced".into()));

        let (_tx, rx) = watch::channel(false);
        let termination = f.consumer.run(rx).await;

        assert!(matches!(
            termination,
            Termination::Fatal(IngestError::Stream(StreamError::Coordinator(_)))
        ));
        assert_eq!(f.consumer.state(), ConsumerState::Terminated);
    }
}
