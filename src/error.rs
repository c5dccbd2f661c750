//! # Error Types
//!
//! Crate-wide error taxonomy. Stage failures are *not* represented here: they are
//! plain data ([`crate::orchestration::StageError`]) absorbed by the orchestrator and
//! never returned to callers of `submit`/`advance`.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::notifications::HubError;
use crate::queue::QueueError;
use crate::state_machine::StateMachineError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum StagehandError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Notification error: {0}")]
    Notification(#[from] HubError),

    #[error("Job not found: {0}")]
    NotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StagehandError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

pub type Result<T> = std::result::Result<T, StagehandError>;
