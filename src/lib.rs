#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Stagehand Core
//!
//! Multi-stage job orchestration with classified retries, post-mortem failure recovery
//! and live progress push.
//!
//! ## Overview
//!
//! A job moves through four stages (recognition, lookup, confirmation, generation).
//! Each stage is executed by a pluggable [`orchestration::StageExecutor`]; the
//! orchestrator owns the job's state machine and turns every stage failure into a
//! classified retry decision instead of an error for the caller.
//!
//! ## Architecture
//!
//! - **Orchestrator**: drives `Pending → Stage1Running → ... → Completed`, with every
//!   state change applied through an optimistic compare-and-set on the job store
//! - **Retry decision engine**: maps an [`orchestration::ErrorCategory`] (and job kind)
//!   to a strategy with bounded, jittered delays and keeps a per-kind error history
//! - **Recovery scheduler**: periodically analyses terminal failures and re-injects,
//!   escalates or flags them for manual review
//! - **Notification hub**: one live push channel per subject plus an operator broadcast
//! - **Housekeeping**: stuck-job and timeout sweeps, statistics and retention cleanup
//!
//! ## Module Organization
//!
//! - [`bootstrap`] - Wires every component into a runnable system
//! - [`config`] - Layered configuration
//! - `database` - Embedded PostgreSQL migrations (feature `postgres`)
//! - [`error`] - Structured error handling
//! - [`state_machine`] - Job states, events and the transition table
//! - [`models`] - Job record, patches and filters
//! - [`store`] - Job persistence (in-memory and PostgreSQL)
//! - [`queue`] - Delayed work queue (in-memory and PostgreSQL)
//! - [`orchestration`] - Classification, retry decisions, the orchestrator and worker pool
//! - [`recovery`] - Failure analysis and recovery scans
//! - [`notifications`] - Push connections and operator notices
//! - [`housekeeping`] - Periodic maintenance tasks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stagehand::bootstrap::StagehandSystem;
//! use stagehand::config::ConfigManager;
//! use stagehand::models::NewJob;
//! use stagehand::orchestration::StageExecutors;
//!
//! # async fn example(executors: StageExecutors) -> Result<(), Box<dyn std::error::Error>> {
//! stagehand::logging::init_structured_logging();
//! let config = ConfigManager::load()?;
//! let system = StagehandSystem::in_memory(config.config(), executors)?;
//! let handle = system.start();
//!
//! let (job_id, correlation_id) = system
//!     .orchestrator()
//!     .submit(NewJob::new("s3://uploads/label-001.png", "user-42"))
//!     .await?;
//! println!("submitted {job_id} as {correlation_id}");
//!
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! ```

pub mod bootstrap;
pub mod config;
pub mod constants;
#[cfg(feature = "postgres")]
pub mod database;
pub mod error;
pub mod housekeeping;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod orchestration;
pub mod queue;
pub mod recovery;
pub mod state_machine;
pub mod store;

pub use bootstrap::{StagehandSystem, SystemHandle};
pub use config::{ConfigManager, StagehandConfig};
pub use error::{Result, StagehandError};
pub use housekeeping::{HousekeepingScheduler, PeriodicTask, Schedule, TaskSpec};
pub use models::{Job, JobFilter, JobPatch, NewJob};
pub use notifications::{NotificationEvent, NotificationHub, OperatorNotice, PushMessage};
pub use orchestration::{
    AdvanceOutcome, ErrorCategory, ErrorClassifier, Orchestrator, RetryDecisionEngine,
    RetryStrategy, StageError, StageExecutor, StageExecutors, StageOutcome, WorkerPool,
};
pub use queue::{DelayedQueue, WorkItem, WorkReason};
pub use recovery::{FailureAnalyzer, FailureCategory, RecoveryScheduler};
pub use state_machine::{JobState, Stage};
pub use store::{CasOutcome, JobStore};
