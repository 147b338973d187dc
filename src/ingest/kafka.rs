//! Kafka-backed [`EventStream`] and [`EventPublisher`].
//!
//! Auto-commit is disabled; offsets are committed explicitly after a batch
//! reached both stores. Messages fetched for other partitions while filling
//! a batch are buffered locally and served on later polls, so each
//! [`RawBatch`] only ever spans one partition.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::publisher::{
    EventPublisher, PublishError, EVENT_TYPE_ERROR, EVENT_TYPE_HEADER, SOURCE_HEADER,
};
use super::stream::{EventStream, RawBatch, RawMessage, StreamError};
use crate::event::ErrorEvent;

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub client_id: String,
    /// Upper bound on messages per batch
    pub max_batch: usize,
    /// How long one poll waits to fill a batch
    pub poll_window: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "error-events".to_string(),
            group_id: "error-events-processor".to_string(),
            client_id: "error-tracking-service".to_string(),
            max_batch: 100,
            poll_window: Duration::from_millis(500),
        }
    }
}

impl KafkaConfig {
    fn consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set("group.id", &self.group_id);
        config.set("client.id", &self.client_id);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");
        config
    }

    fn producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config.set("client.id", &self.client_id);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");
        config
    }
}

pub struct KafkaEventStream {
    consumer: StreamConsumer,
    topic: String,
    max_batch: usize,
    poll_window: Duration,
    pending: Mutex<BTreeMap<i32, VecDeque<RawMessage>>>,
}

impl KafkaEventStream {
    /// Create the consumer and subscribe to the configured topic.
    pub fn connect(config: &KafkaConfig) -> Result<Self, StreamError> {
        let consumer: StreamConsumer = config
            .consumer_config()
            .create()
            .map_err(|e| StreamError::Coordinator(format!("Failed to create consumer: {}", e)))?;
        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| StreamError::Coordinator(format!("Failed to subscribe: {}", e)))?;

        info!(topic = %config.topic, group = %config.group_id, "Subscribed to Kafka topic");
        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            max_batch: config.max_batch.max(1),
            poll_window: config.poll_window,
            pending: Mutex::new(BTreeMap::new()),
        })
    }

    /// Take up to `max_batch` buffered messages from the first non-empty partition.
    fn take_pending(&self) -> Option<RawBatch> {
        let mut pending = self.pending.lock();
        let (&partition, queue) = pending.iter_mut().find(|(_, q)| !q.is_empty())?;
        let take = queue.len().min(self.max_batch);
        let messages: Vec<RawMessage> = queue.drain(..take).collect();
        Some(RawBatch {
            topic: self.topic.clone(),
            partition,
            messages,
        })
    }

    fn buffered(&self) -> usize {
        self.pending.lock().values().map(VecDeque::len).sum()
    }
}

#[async_trait]
impl EventStream for KafkaEventStream {
    async fn next_batch(&self) -> Result<Option<RawBatch>, StreamError> {
        if let Some(batch) = self.take_pending() {
            return Ok(Some(batch));
        }

        let deadline = Instant::now() + self.poll_window;
        while self.buffered() < self.max_batch {
            let received = match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Ok(received) => received,
                Err(_) => break,
            };
            let message = received.map_err(|e| StreamError::Poll(e.to_string()))?;
            let raw = RawMessage {
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                payload: message.payload().map(<[u8]>::to_vec),
            };
            self.pending
                .lock()
                .entry(raw.partition)
                .or_default()
                .push_back(raw);
        }

        Ok(self.take_pending())
    }

    async fn commit(&self, batch: &RawBatch) -> Result<(), StreamError> {
        let Some(last) = batch.last_offset() else {
            return Ok(());
        };
        let mut offsets = TopicPartitionList::new();
        // Kafka stores the next offset to read
        offsets
            .add_partition_offset(&batch.topic, batch.partition, Offset::Offset(last + 1))
            .map_err(|e| StreamError::Commit(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| StreamError::Commit(e.to_string()))?;
        debug!(partition = batch.partition, offset = last, "Committed offset");
        Ok(())
    }

    async fn rewind(&self, batch: &RawBatch) -> Result<(), StreamError> {
        let Some(first) = batch.first_offset() else {
            return Ok(());
        };
        // Anything buffered past the batch will be fetched again after the seek
        self.pending.lock().remove(&batch.partition);
        self.consumer
            .seek(&batch.topic, batch.partition, Offset::Offset(first), SEEK_TIMEOUT)
            .map_err(|e| StreamError::Seek(e.to_string()))?;
        warn!(partition = batch.partition, offset = first, "Rewound partition for redelivery");
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), StreamError> {
        // librdkafka heartbeats on its own thread; surface group failures here
        match self.consumer.client().fatal_error() {
            Some((code, reason)) => Err(StreamError::Coordinator(format!("{:?}: {}", code, reason))),
            None => Ok(()),
        }
    }
}

pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
    source: String,
}

impl KafkaEventPublisher {
    pub fn connect(config: &KafkaConfig) -> Result<Self, PublishError> {
        let producer: FutureProducer = config
            .producer_config()
            .create()
            .map_err(|e| PublishError::Delivery(format!("Failed to create producer: {}", e)))?;
        Ok(Self {
            producer,
            topic: config.topic.clone(),
            source: config.client_id.clone(),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, events: &[ErrorEvent]) -> Result<usize, PublishError> {
        for event in events {
            let payload =
                serde_json::to_vec(event).map_err(|e| PublishError::Encode(e.to_string()))?;
            let key = Uuid::new_v4().to_string();
            let headers = OwnedHeaders::new()
                .insert(Header {
                    key: EVENT_TYPE_HEADER,
                    value: Some(EVENT_TYPE_ERROR),
                })
                .insert(Header {
                    key: SOURCE_HEADER,
                    value: Some(self.source.as_str()),
                });

            let record = FutureRecord::to(&self.topic)
                .key(&key)
                .payload(&payload)
                .headers(headers);
            self.producer
                .send(record, SEND_TIMEOUT)
                .await
                .map_err(|(e, _)| PublishError::Delivery(e.to_string()))?;
        }

        debug!(topic = %self.topic, count = events.len(), "Published events to Kafka");
        Ok(events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_config_disables_auto_commit() {
        let config = KafkaConfig::default().consumer_config();
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("group.id"), Some("error-events-processor"));
    }

    #[test]
    fn test_producer_config_requires_all_acks() {
        let config = KafkaConfig::default().producer_config();
        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(config.get("bootstrap.servers"), Some("localhost:9092"));
    }
}
