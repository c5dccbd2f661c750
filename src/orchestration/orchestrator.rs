//! # Orchestrator
//!
//! Drives jobs through the four stages.
//!
//! ## Advance
//!
//! `advance(job_id)` is the only entry point workers call. One invocation executes at
//! most one stage:
//!
//! 1. Load the job. Terminal or revoked jobs are a no-op, and so is a job whose
//!    retry or hold is still pending (`next_attempt_at` in the future).
//! 2. `Pending` and `Stage3Done` first take their entry transition (`Start`,
//!    `BeginGeneration`).
//! 3. Run the stage executor under the configured time budget. No lock is held while
//!    it runs; an overrun becomes a `StageTimeout` failure.
//! 4. Re-read the job. If it was revoked or moved on in the meantime the result is
//!    discarded.
//! 5. Commit the outcome through the state machine's compare-and-set. Losing the race
//!    is a no-op, which makes duplicate dispatch harmless.
//!
//! Follow-up work (next stage, retry, hold) is scheduled on the delayed queue after the
//! transition commits. Nothing sleeps inside a worker.
//!
//! Stage failures never escape `advance`: they are classified, retried or recorded on
//! the job. `advance` only returns `Err` for infrastructure problems (store, queue).

use chrono::Utc;
use opentelemetry::KeyValue;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::error_classifier::{ErrorCategory, ErrorKind, StageError};
use super::retry::RetryDecisionEngine;
use super::stage_executor::{StageExecutors, StageOutcome};
use crate::config::OrchestratorConfig;
use crate::constants::events;
use crate::error::{Result, StagehandError};
use crate::logging::log_stage_failure;
use crate::metrics;
use crate::models::{Job, JobPatch, NewJob};
use crate::notifications::{NotificationEvent, NotificationHub};
use crate::queue::{offset_from, DelayedQueue, WorkItem, WorkReason};
use crate::recovery::FailureCategory;
use crate::state_machine::{JobEvent, JobState, JobStateMachine, Stage};
use crate::store::{CasOutcome, JobStore};

/// Why `advance` did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoOpReason {
    Terminal,
    Revoked,
    /// Another writer moved the job first
    Conflict,
    /// A retry, hold or recovery delay has not elapsed yet
    NotDue,
}

/// What a single `advance` call did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvanceOutcome {
    Advanced { from: JobState, to: JobState },
    Completed,
    Returned,
    RetryScheduled {
        category: ErrorCategory,
        delay: Duration,
        attempt: u32,
    },
    Held { recheck_after: Duration },
    Failed { category: ErrorCategory },
    NoOp(NoOpReason),
}

/// Read model for status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub id: i64,
    pub correlation_id: String,
    pub state: JobState,
    pub progress: u8,
    pub retry_count: u32,
    pub recovery_attempts: u32,
    pub error_message: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub revoked: bool,
    pub manual_review: bool,
    pub updated_at: chrono::DateTime<Utc>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            correlation_id: job.correlation_id.clone(),
            state: job.state,
            progress: job.progress_percent(),
            retry_count: job.retry_count,
            recovery_attempts: job.recovery_attempts,
            error_message: job.error_message.clone(),
            error_category: job.error_category,
            revoked: job.revoked,
            manual_review: job.manual_review,
            updated_at: job.updated_at,
        }
    }
}

const REVOKE_ATTEMPTS: usize = 5;

/// Clock slack between the queue's notion of due and ours
const DUE_TOLERANCE: Duration = Duration::from_secs(1);

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn DelayedQueue>,
    machine: JobStateMachine,
    executors: StageExecutors,
    retry_engine: Arc<RetryDecisionEngine>,
    hub: Arc<NotificationHub>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("executors", &self.executors)
            .field("config", &self.config)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn DelayedQueue>,
        executors: StageExecutors,
        retry_engine: Arc<RetryDecisionEngine>,
        hub: Arc<NotificationHub>,
        config: OrchestratorConfig,
    ) -> Self {
        let missing = executors.missing();
        if !missing.is_empty() {
            warn!(missing = ?missing, "Orchestrator created without executors for some stages");
        }
        Self {
            machine: JobStateMachine::new(Arc::clone(&store)),
            store,
            queue,
            executors,
            retry_engine,
            hub,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn DelayedQueue> {
        &self.queue
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn retry_engine(&self) -> &Arc<RetryDecisionEngine> {
        &self.retry_engine
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Create the job and schedule its first advance. Returns the job id and its
    /// correlation id; everything afterwards is observed asynchronously.
    pub async fn submit(&self, new_job: NewJob) -> Result<(i64, String)> {
        let job = self.store.create(new_job).await?;
        self.queue
            .schedule(WorkItem::now(job.id, WorkReason::Submit))
            .await?;

        metrics::jobs_submitted_total().add(1, &[KeyValue::new("job_kind", job.job_kind.clone())]);
        info!(
            job_id = job.id,
            correlation_id = %job.correlation_id,
            owner = %job.owner,
            job_kind = %job.job_kind,
            "📥 JOB_SUBMITTED"
        );
        self.notify(&job, events::JOB_SUBMITTED, "Job submitted");

        Ok((job.id, job.correlation_id))
    }

    pub async fn advance(&self, job_id: i64) -> Result<AdvanceOutcome> {
        let mut job = self.load(job_id).await?;

        if job.revoked {
            return Ok(AdvanceOutcome::NoOp(NoOpReason::Revoked));
        }
        if job.state.is_terminal() {
            debug!(job_id, state = %job.state, "Advance on terminal job ignored");
            return Ok(AdvanceOutcome::NoOp(NoOpReason::Terminal));
        }
        if job.has_pending_attempt(offset_from(Utc::now(), DUE_TOLERANCE)) {
            debug!(
                job_id,
                next_attempt_at = ?job.next_attempt_at,
                "Advance before the pending attempt is due ignored"
            );
            return Ok(AdvanceOutcome::NoOp(NoOpReason::NotDue));
        }

        let entry = match job.state {
            JobState::Pending => Some(JobEvent::Start),
            JobState::Stage3Done => Some(JobEvent::BeginGeneration),
            _ => None,
        };
        if let Some(event) = entry {
            let patch = JobPatch::new().started_at(Utc::now()).clear_next_attempt();
            match self.machine.transition(&job, event, patch).await? {
                CasOutcome::Applied(updated) => {
                    job = updated;
                    self.notify(&job, events::JOB_STAGE_STARTED, "Stage started");
                }
                CasOutcome::Conflict { .. } => return Ok(AdvanceOutcome::NoOp(NoOpReason::Conflict)),
            }
        }

        let Some(stage) = job.state.stage() else {
            return Err(StagehandError::Internal(format!(
                "job {} in state {} has no stage to execute",
                job.id, job.state
            )));
        };
        let executor = self.executors.get(stage).cloned().ok_or_else(|| {
            StagehandError::Internal(format!("no executor registered for the {stage} stage"))
        })?;

        let budget = self.config.stage_timeout();
        let started = Instant::now();
        let result = match tokio::time::timeout(budget, executor.execute(&job)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::stage_timeout(stage, budget)),
        };
        metrics::stage_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("stage", stage.to_string())],
        );

        // Revocation or a competing writer wins over whatever the stage computed
        let current = self.load(job_id).await?;
        if current.revoked {
            info!(job_id, stage = %stage, "Discarding stage result for revoked job");
            return Ok(AdvanceOutcome::NoOp(NoOpReason::Revoked));
        }
        if current.version != job.version {
            debug!(job_id, stage = %stage, "Job moved during stage execution");
            return Ok(AdvanceOutcome::NoOp(NoOpReason::Conflict));
        }

        match result {
            Ok(StageOutcome::Advanced(reference)) => self.complete_stage(&job, stage, reference).await,
            Ok(StageOutcome::Hold { recheck_after }) => self.hold(&job, stage, recheck_after).await,
            Ok(StageOutcome::Returned) if stage.may_return() => self.mark_returned(&job, stage).await,
            Ok(StageOutcome::Returned) => {
                let error = StageError::new(
                    ErrorKind::Domain,
                    format!("{stage} stage reported a return, which only lookup and confirmation may do"),
                );
                self.handle_failure(&job, stage, error).await
            }
            Err(error) => self.handle_failure(&job, stage, error).await,
        }
    }

    async fn complete_stage(&self, job: &Job, stage: Stage, reference: String) -> Result<AdvanceOutcome> {
        let now = Utc::now();
        let mut patch = JobPatch::new()
            .payload_ref(stage, reference)
            .retry_count(0)
            .clear_next_attempt();
        if stage == Stage::Generation {
            patch = patch.completed_at(now);
        }

        let updated = match self.machine.transition(job, JobEvent::StageSucceeded, patch).await? {
            CasOutcome::Applied(updated) => updated,
            CasOutcome::Conflict { .. } => return Ok(AdvanceOutcome::NoOp(NoOpReason::Conflict)),
        };
        metrics::stages_completed_total().add(1, &[KeyValue::new("stage", stage.to_string())]);

        if updated.state == JobState::Completed {
            self.notify(&updated, events::JOB_COMPLETED, "Job completed");
            return Ok(AdvanceOutcome::Completed);
        }

        self.queue
            .schedule(WorkItem::now(updated.id, WorkReason::StageAdvance))
            .await?;
        self.notify(
            &updated,
            events::JOB_STAGE_COMPLETED,
            format!("{stage} stage completed"),
        );

        Ok(AdvanceOutcome::Advanced {
            from: job.state,
            to: updated.state,
        })
    }

    async fn hold(&self, job: &Job, stage: Stage, recheck_after: Duration) -> Result<AdvanceOutcome> {
        let next = offset_from(Utc::now(), recheck_after);
        let patch = JobPatch::new().next_attempt_at(next);
        match self.machine.transition(job, JobEvent::Reschedule, patch).await? {
            CasOutcome::Applied(_) => {}
            CasOutcome::Conflict { .. } => return Ok(AdvanceOutcome::NoOp(NoOpReason::Conflict)),
        }

        self.queue
            .schedule(WorkItem::at(job.id, WorkReason::Hold, next))
            .await?;
        debug!(
            job_id = job.id,
            stage = %stage,
            recheck_after_secs = recheck_after.as_secs(),
            "Stage on hold"
        );
        Ok(AdvanceOutcome::Held { recheck_after })
    }

    async fn mark_returned(&self, job: &Job, stage: Stage) -> Result<AdvanceOutcome> {
        let patch = JobPatch::new().completed_at(Utc::now()).clear_next_attempt();
        let updated = match self.machine.transition(job, JobEvent::Return, patch).await? {
            CasOutcome::Applied(updated) => updated,
            CasOutcome::Conflict { .. } => return Ok(AdvanceOutcome::NoOp(NoOpReason::Conflict)),
        };
        self.notify(
            &updated,
            events::JOB_RETURNED,
            format!("Returned during the {stage} stage"),
        );
        Ok(AdvanceOutcome::Returned)
    }

    async fn handle_failure(&self, job: &Job, stage: Stage, error: StageError) -> Result<AdvanceOutcome> {
        let attempt = job.retry_count;
        let verdict = self.retry_engine.should_retry(&error, attempt, &job.job_kind);
        let category = verdict.category;

        metrics::stages_failed_total().add(
            1,
            &[
                KeyValue::new("stage", stage.to_string()),
                KeyValue::new("category", category.to_string()),
            ],
        );
        log_stage_failure(
            job.id,
            &stage.to_string(),
            &category.to_string(),
            attempt,
            verdict.retry,
            &error.message,
        );

        if verdict.retry {
            let delay = self.retry_engine.delay(&verdict.strategy, attempt);
            let next = offset_from(Utc::now(), delay);
            let patch = JobPatch::new()
                .retry_count(attempt + 1)
                .next_attempt_at(next)
                .error(error.message.clone(), category);

            let updated = match self.machine.transition(job, JobEvent::Reschedule, patch).await? {
                CasOutcome::Applied(updated) => updated,
                CasOutcome::Conflict { .. } => return Ok(AdvanceOutcome::NoOp(NoOpReason::Conflict)),
            };
            self.queue
                .schedule(WorkItem::at(job.id, WorkReason::Retry, next))
                .await?;

            metrics::retries_scheduled_total()
                .add(1, &[KeyValue::new("category", category.to_string())]);
            let event = NotificationEvent::for_job(
                &updated,
                events::JOB_RETRY_SCHEDULED,
                format!("Retrying {stage} stage"),
            )
            .with_payload(serde_json::json!({
                "attempt": attempt + 1,
                "delaySecs": delay.as_secs(),
                "category": category,
            }));
            self.hub.publish(&event);

            return Ok(AdvanceOutcome::RetryScheduled {
                category,
                delay,
                attempt: attempt + 1,
            });
        }

        let patch = JobPatch::new()
            .error(error.message.clone(), category)
            .clear_next_attempt();
        let updated = match self.machine.transition(job, JobEvent::Fail, patch).await? {
            CasOutcome::Applied(updated) => updated,
            CasOutcome::Conflict { .. } => return Ok(AdvanceOutcome::NoOp(NoOpReason::Conflict)),
        };

        metrics::jobs_failed_total().add(1, &[KeyValue::new("category", category.to_string())]);
        let event = NotificationEvent::for_job(&updated, events::JOB_FAILED, error.message.clone())
            .with_payload(serde_json::json!({
                "stage": stage,
                "category": category,
            }));
        self.hub.publish(&event);

        Ok(AdvanceOutcome::Failed { category })
    }

    /// Mark the job revoked. Running jobs move to `Failed`; a job already failed keeps
    /// its state and only gains the flag. Returns `false` when the job had already
    /// finished or was revoked before.
    pub async fn revoke(&self, job_id: i64) -> Result<bool> {
        for _ in 0..REVOKE_ATTEMPTS {
            let job = self.load(job_id).await?;
            if job.revoked || matches!(job.state, JobState::Completed | JobState::Returned) {
                return Ok(false);
            }

            let patch = JobPatch::new().revoked().clear_next_attempt();
            match self.machine.transition(&job, JobEvent::Revoke, patch).await? {
                CasOutcome::Applied(updated) => {
                    info!(job_id, "🛑 JOB_REVOKED");
                    self.notify(&updated, events::JOB_REVOKED, "Job revoked");
                    return Ok(true);
                }
                CasOutcome::Conflict { .. } => continue,
            }
        }

        warn!(job_id, "Revoke kept losing to concurrent writers");
        Ok(false)
    }

    /// Move a failed job back into `stage` and schedule its advance after `delay`.
    /// Goes through the same compare-and-set path as live processing; returns `false`
    /// when the job changed since `job` was read.
    pub async fn recover(
        &self,
        job: &Job,
        stage: Stage,
        delay: Duration,
        failure_category: Option<FailureCategory>,
        reason: WorkReason,
    ) -> Result<bool> {
        let next = offset_from(Utc::now(), delay);
        let mut patch = JobPatch::new()
            .recovery_attempts(job.recovery_attempts + 1)
            .retry_count(0)
            .next_attempt_at(next);
        if let Some(category) = failure_category {
            patch = patch.failure_category(category);
        }
        // a recovered job is eligible for the next scan if it fails again
        patch.failure_notified = Some(false);
        patch.manual_review = Some(false);

        let updated = match self.machine.transition(job, JobEvent::Recover(stage), patch).await? {
            CasOutcome::Applied(updated) => updated,
            CasOutcome::Conflict { .. } => return Ok(false),
        };
        self.queue
            .schedule(WorkItem::at(job.id, reason, next))
            .await?;

        let event = NotificationEvent::for_job(
            &updated,
            events::JOB_RECOVERY_SCHEDULED,
            format!("Recovery scheduled from the {stage} stage"),
        )
        .with_payload(serde_json::json!({
            "stage": stage,
            "delaySecs": delay.as_secs(),
            "recoveryAttempts": updated.recovery_attempts,
        }));
        self.hub.publish(&event);
        Ok(true)
    }

    /// Record fields on a failed job without changing its state
    pub async fn annotate(&self, job: &Job, patch: JobPatch) -> Result<bool> {
        Ok(self
            .machine
            .transition(job, JobEvent::Annotate, patch)
            .await?
            .is_applied())
    }

    /// Re-dispatch a job that stopped moving. Counts as a retry.
    pub async fn readvance(&self, job: &Job) -> Result<bool> {
        let now = Utc::now();
        let patch = JobPatch::new()
            .retry_count(job.retry_count + 1)
            .next_attempt_at(now);
        if !self
            .machine
            .transition(job, JobEvent::Reschedule, patch)
            .await?
            .is_applied()
        {
            return Ok(false);
        }
        self.queue
            .schedule(WorkItem::at(job.id, WorkReason::StuckSweep, now))
            .await?;
        Ok(true)
    }

    /// Fail a non-terminal job from outside the stage pipeline
    pub async fn force_fail(&self, job: &Job, message: &str, category: ErrorCategory) -> Result<bool> {
        let patch = JobPatch::new().error(message, category).clear_next_attempt();
        let updated = match self.machine.transition(job, JobEvent::Fail, patch).await? {
            CasOutcome::Applied(updated) => updated,
            CasOutcome::Conflict { .. } => return Ok(false),
        };
        metrics::jobs_failed_total().add(1, &[KeyValue::new("category", category.to_string())]);
        self.notify(&updated, events::JOB_FAILED, message);
        Ok(true)
    }

    pub async fn job_status(&self, job_id: i64) -> Result<JobStatus> {
        Ok(JobStatus::from(&self.load(job_id).await?))
    }

    pub async fn job_status_by_correlation_id(&self, correlation_id: &str) -> Result<Option<JobStatus>> {
        Ok(self
            .store
            .get_by_correlation_id(correlation_id)
            .await?
            .as_ref()
            .map(JobStatus::from))
    }

    async fn load(&self, job_id: i64) -> Result<Job> {
        self.store
            .get_by_id(job_id)
            .await?
            .ok_or(StagehandError::NotFound(job_id))
    }

    fn notify(&self, job: &Job, event_type: &str, message: impl Into<String>) {
        self.hub.publish(&NotificationEvent::for_job(job, event_type, message));
    }
}
