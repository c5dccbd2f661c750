//! # Job Store
//!
//! Durable record of jobs. The store is the only shared mutable state in the engine;
//! the single synchronization point is [`JobStore::compare_and_set_state`], which
//! applies a transition only if the persisted job still has the expected state *and*
//! version.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryJobStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresJobStore;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{Job, JobFilter, JobPatch, NewJob};
use crate::state_machine::JobState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt value '{value}' in column '{column}'")]
    Corrupt { column: String, value: String },

    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(String),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(format!("migration failed: {err}"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a compare-and-set transition write
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The write landed; carries the updated job
    Applied(Job),
    /// Another writer moved the job first; carries what is persisted now
    Conflict { current: Option<Job> },
}

impl CasOutcome {
    pub fn applied(&self) -> Option<&Job> {
        match self {
            Self::Applied(job) => Some(job),
            Self::Conflict { .. } => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job in `Pending`
    async fn create(&self, new_job: NewJob) -> StoreResult<Job>;

    async fn get_by_id(&self, id: i64) -> StoreResult<Option<Job>>;

    async fn get_by_correlation_id(&self, correlation_id: &str) -> StoreResult<Option<Job>>;

    /// Atomically move job `id` from (`expected_state`, `expected_version`) to
    /// `new_state`, applying `patch` in the same write
    async fn compare_and_set_state(
        &self,
        id: i64,
        expected_state: JobState,
        expected_version: i64,
        new_state: JobState,
        patch: JobPatch,
    ) -> StoreResult<CasOutcome>;

    /// Matching jobs, most recently updated first
    async fn list_by_filter(&self, filter: &JobFilter) -> StoreResult<Vec<Job>>;

    async fn count_by_state(&self) -> StoreResult<HashMap<JobState, u64>>;

    /// Delete matching jobs. Reserved for housekeeping cleanup.
    async fn purge(&self, filter: &JobFilter) -> StoreResult<u64>;
}
