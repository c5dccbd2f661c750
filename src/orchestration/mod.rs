//! # Orchestration Engine
//!
//! Stage execution, failure classification and retry decisions.
//!
//! ## Core Components
//!
//! - **Orchestrator**: `submit`/`advance` entry points; commits every outcome through the
//!   state machine's compare-and-set and schedules follow-up work on the delayed queue
//! - **StageExecutor**: pluggable per-stage business logic, unaware of retries
//! - **ErrorClassifier**: ordered rule table mapping a stage failure to an `ErrorCategory`
//! - **RetryDecisionEngine**: per-category strategies, backoff delays and error history
//! - **WorkerPool**: bounded concurrent consumer of the delayed queue
//!
//! ```text
//!  WorkerPool ──claim──▶ DelayedQueue
//!      │                     ▲
//!      ▼ advance(id)         │ schedule(next stage / retry / hold)
//!  Orchestrator ─────────────┘
//!      │ execute             │ classify + should_retry
//!      ▼                     ▼
//!  StageExecutor      RetryDecisionEngine ──▶ ErrorClassifier
//! ```

pub mod error_classifier;
pub mod orchestrator;
pub mod retry;
pub mod stage_executor;
pub mod worker_pool;

pub use error_classifier::{
    ErrorCategory, ErrorClassifier, ErrorKind, StageError, StandardErrorClassifier,
};
pub use orchestrator::{AdvanceOutcome, JobStatus, NoOpReason, Orchestrator};
pub use retry::{
    ErrorAnalysis, ErrorRecord, ErrorStatistics, RetryDecision, RetryDecisionEngine,
    RetryStrategy, RetryStrategyPresets, RetryVerdict,
};
pub use stage_executor::{StageExecutor, StageExecutors, StageOutcome};
pub use worker_pool::{PoolRunReport, WorkerPool};
