//! Ingestion: stream → validate → record store + search index → invalidate → commit.
//!
//! ```text
//! EventStream ──next_batch──→ StreamConsumer
//!                                ├─ ErrorEvent::from_payload (bad messages dropped)
//!                                ├─ DualStoreWriter (RecordStore, then SearchIndex)
//!                                ├─ CacheAside::invalidate_namespace (search, stats)
//!                                └─ EventStream::commit
//! ```

pub mod consumer;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod publisher;
pub mod seed;
pub mod stream;
pub mod writer;

pub use consumer::{BatchOutcome, ConsumerState, IngestError, StreamConsumer, Termination};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaEventPublisher, KafkaEventStream};
pub use publisher::{EventPublisher, PublishError};
pub use seed::{load_events_file, parse_events, seed_events, SeedError, SeedOutcome};
pub use stream::{EventStream, MemoryStream, RawBatch, RawMessage, StreamError};
pub use writer::{DualStoreWriter, WriteReport};
