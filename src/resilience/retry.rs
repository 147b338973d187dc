// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Provides configurable retry behavior for transient failures.
//! Different presets are available for different use cases.
//!
//! # Example
//!
//! ```
//! use error_insights::RetryConfig;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Consumer: keep redelivering a failed batch forever
//! let consumer = RetryConfig::consumer();
//! assert_eq!(consumer.max_retries, None);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for connection/operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - Fast-fail for initial connections
/// - [`RetryConfig::consumer()`] - Backoff between redeliveries of a failed batch
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::consumer()
    }
}

impl RetryConfig {
    /// Fast-fail retry for initial startup connection.
    /// Attempts 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Backoff between failed batch writes in the consumer run loop.
    /// Never gives up: the batch is redelivered until the stores accept it.
    #[must_use]
    pub fn consumer() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[must_use]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Start a stateful backoff sequence for this config.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            config: self.clone(),
            next: self.initial_delay,
            attempts: 0,
        }
    }
}

/// Stateful exponential backoff, for loops that own their own retry decision.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    next: Duration,
    attempts: usize,
}

impl Backoff {
    /// Delay to wait before the next attempt; grows by `factor` up to `max_delay`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.attempts += 1;
        self.next = self.next.mul_f64(self.config.factor).min(self.config.max_delay);
        delay
    }

    /// Whether `max_retries` has been reached.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        matches!(self.config.max_retries, Some(max) if self.attempts >= max)
    }

    /// Consecutive failures seen since the last reset.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Reset after a success.
    pub fn reset(&mut self) {
        self.next = self.config.initial_delay;
        self.attempts = 0;
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = config.backoff();

    loop {
        match operation().await {
            Ok(val) => {
                if backoff.attempts() > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, backoff.attempts());
                }
                return Ok(val);
            }
            Err(err) => {
                let delay = backoff.next_delay();
                if backoff.exhausted() {
                    return Err(err);
                }

                match config.max_retries {
                    Some(max) => warn!(
                        "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name, backoff.attempts(), max, err, delay
                    ),
                    None => warn!(
                        "Operation '{}' failed (attempt {}, will retry forever): {}. Next retry in {:?}...",
                        operation_name, backoff.attempts(), err, delay
                    ),
                }

                sleep(delay).await;
            }
        }
    }
}
