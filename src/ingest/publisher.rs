use async_trait::async_trait;
use thiserror::Error;

use crate::event::ErrorEvent;

/// Header naming the kind of payload on the wire
pub const EVENT_TYPE_HEADER: &str = "event-type";
pub const EVENT_TYPE_ERROR: &str = "error";
/// Header naming the producer
pub const SOURCE_HEADER: &str = "source";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(String),
    #[error("failed to deliver event: {0}")]
    Delivery(String),
}

/// Publishes error events onto the stream.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish every event; returns how many were delivered.
    async fn publish(&self, events: &[ErrorEvent]) -> Result<usize, PublishError>;
}
