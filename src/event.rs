//! Error event data structure.
//!
//! An [`ErrorEvent`] is the immutable fact that flows through the ingestion
//! pipeline. It is parsed from a raw stream payload, validated, and then
//! written unchanged to both the record store and the search index.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a raw payload is rejected before reaching either store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("message has no payload")]
    EmptyPayload,
    #[error("payload is not a valid event document: {0}")]
    Malformed(String),
    #[error("field '{0}' must be a non-empty string")]
    EmptyField(&'static str),
    #[error("timestamp '{0}' is not an ISO-8601 datetime")]
    InvalidTimestamp(String),
}

/// Zone-less layouts accepted after RFC 3339, most specific first.
const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Parse an ISO-8601 timestamp the way the search index's `date` type does.
///
/// Values with an offset are converted to UTC; values without one (a bare
/// date or a local date-time) are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// A single application error report.
///
/// # Example
///
/// ```
/// use error_insights::ErrorEvent;
///
/// let payload = br#"{
///     "timestamp": "2025-07-15T10:10:00Z",
///     "userId": "user-42",
///     "browser": "Firefox",
///     "url": "/checkout",
///     "errorMessage": "TypeError: x is undefined",
///     "stackTrace": "at checkout.js:12"
/// }"#;
///
/// let event = ErrorEvent::from_payload(payload).unwrap();
/// assert_eq!(event.user_id, "user-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// ISO-8601 timestamp of when the error happened
    pub timestamp: String,
    pub user_id: String,
    pub browser: String,
    pub url: String,
    pub error_message: String,
    pub stack_trace: String,
}

impl ErrorEvent {
    /// Parse and validate a raw stream payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, EventError> {
        if payload.is_empty() {
            return Err(EventError::EmptyPayload);
        }
        let event: ErrorEvent = serde_json::from_slice(payload)
            .map_err(|e| EventError::Malformed(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Check that every field is present and non-empty and the timestamp parses.
    pub fn validate(&self) -> Result<(), EventError> {
        let fields: [(&'static str, &str); 6] = [
            ("timestamp", &self.timestamp),
            ("userId", &self.user_id),
            ("browser", &self.browser),
            ("url", &self.url),
            ("errorMessage", &self.error_message),
            ("stackTrace", &self.stack_trace),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(EventError::EmptyField(name));
            }
        }

        if parse_timestamp(&self.timestamp).is_none() {
            return Err(EventError::InvalidTimestamp(self.timestamp.clone()));
        }
        Ok(())
    }

    /// Approximate payload size, used for batch byte metrics.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.timestamp.len()
            + self.user_id.len()
            + self.browser.len()
            + self.url.len()
            + self.error_message.len()
            + self.stack_trace.len()
    }
}
