//! Public types for the service coordinator.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::ingest::{ConsumerState, Termination};
use crate::storage::StorageError;

/// Service lifecycle state.
///
/// Use [`super::ServiceContext::state()`] to check the current state or
/// [`super::ServiceContext::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Backends up, queries can be served
    Ready,
    /// Stream consumer running
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// Everything closed
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("storage unavailable: {0}")]
    Storage(#[from] StorageError),
    #[error("cache unavailable: {0}")]
    Cache(#[from] CacheError),
}

/// Handle to a spawned stream consumer task.
pub struct ConsumerHandle {
    pub(super) task: JoinHandle<Termination>,
    pub(super) stop: Arc<watch::Sender<bool>>,
    pub(super) state: watch::Receiver<ConsumerState>,
}

impl ConsumerHandle {
    /// Ask the consumer to stop after its current batch.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    #[must_use]
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to end. A panic inside the task is reported as
    /// [`Termination::Panicked`] rather than propagated.
    pub async fn wait(self) -> Termination {
        match self.task.await {
            Ok(termination) => termination,
            Err(e) if e.is_panic() => {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Termination::Panicked(message)
            }
            Err(_) => Termination::Shutdown,
        }
    }
}
