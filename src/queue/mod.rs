//! # Delayed Work Queue
//!
//! Time-ordered queue of deferred `Advance` calls. Retries, holds and recovery
//! re-injections are scheduled here with a future `run_at` instead of sleeping inside a
//! worker, and a claimed item stays invisible only for a visibility timeout: an item
//! whose worker dies before acknowledging it is handed out again.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryDelayedQueue;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDelayedQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Corrupt work item {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Why an advance was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkReason {
    Submit,
    StageAdvance,
    Retry,
    Hold,
    Recovery,
    StuckSweep,
    ManualRecovery,
}

impl fmt::Display for WorkReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submit => "submit",
            Self::StageAdvance => "stage_advance",
            Self::Retry => "retry",
            Self::Hold => "hold",
            Self::Recovery => "recovery",
            Self::StuckSweep => "stuck_sweep",
            Self::ManualRecovery => "manual_recovery",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for WorkReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submit" => Ok(Self::Submit),
            "stage_advance" => Ok(Self::StageAdvance),
            "retry" => Ok(Self::Retry),
            "hold" => Ok(Self::Hold),
            "recovery" => Ok(Self::Recovery),
            "stuck_sweep" => Ok(Self::StuckSweep),
            "manual_recovery" => Ok(Self::ManualRecovery),
            _ => Err(format!("Invalid work reason: {s}")),
        }
    }
}

/// A deferred `Advance(job_id)` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub job_id: i64,
    pub reason: WorkReason,
    pub run_at: DateTime<Utc>,
    /// Times the item has been claimed
    pub attempts: u32,
}

impl WorkItem {
    pub fn now(job_id: i64, reason: WorkReason) -> Self {
        Self::at(job_id, reason, Utc::now())
    }

    pub fn at(job_id: i64, reason: WorkReason, run_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            reason,
            run_at,
            attempts: 0,
        }
    }

    pub fn after(job_id: i64, reason: WorkReason, delay: Duration) -> Self {
        Self::at(job_id, reason, offset_from(Utc::now(), delay))
    }
}

/// `base + delay`, saturating instead of overflowing
pub fn offset_from(base: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| base.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
pub trait DelayedQueue: Send + Sync {
    async fn schedule(&self, item: WorkItem) -> QueueResult<()>;

    /// Claim up to `limit` items whose `run_at` has passed; they stay invisible for
    /// `visibility` unless acknowledged
    async fn claim_due(&self, limit: usize, visibility: Duration) -> QueueResult<Vec<WorkItem>>;

    /// Remove a claimed item for good
    async fn ack(&self, id: Uuid) -> QueueResult<bool>;

    /// Earliest time an item becomes claimable
    async fn next_run_at(&self) -> QueueResult<Option<DateTime<Utc>>>;

    /// Items scheduled or in flight
    async fn len(&self) -> QueueResult<usize>;

    /// Scheduled, unclaimed items in run order
    async fn pending(&self) -> QueueResult<Vec<WorkItem>>;
}
