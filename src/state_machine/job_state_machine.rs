use std::sync::Arc;

use tracing::debug;

use super::errors::{StateMachineError, StateMachineResult};
use super::events::JobEvent;
use super::states::JobState;
use crate::error::Result;
use crate::logging::log_job_transition;
use crate::models::{Job, JobPatch};
use crate::store::{CasOutcome, JobStore};

/// Compute the state an event leads to. This table is the whole job graph; any pair
/// not listed is an invalid transition.
pub fn determine_target_state(
    current_state: JobState,
    event: &JobEvent,
) -> StateMachineResult<JobState> {
    let target = match (current_state, event) {
        (JobState::Pending, JobEvent::Start) => JobState::Stage1Running,

        // Stage progression
        (JobState::Stage1Running, JobEvent::StageSucceeded) => JobState::Stage2Running,
        (JobState::Stage2Running, JobEvent::StageSucceeded) => JobState::Stage3Running,
        (JobState::Stage3Running, JobEvent::StageSucceeded) => JobState::Stage3Done,
        (JobState::Stage3Done, JobEvent::BeginGeneration) => JobState::Stage4Running,
        (JobState::Stage4Running, JobEvent::StageSucceeded) => JobState::Completed,

        // Domain return from lookup or confirmation
        (JobState::Stage2Running | JobState::Stage3Running, JobEvent::Return) => {
            JobState::Returned
        }

        (state, JobEvent::Fail) if !state.is_terminal() => JobState::Failed,
        (state, JobEvent::Revoke) if !state.is_terminal() || state.is_error() => JobState::Failed,

        // Self-loops
        (state, JobEvent::Reschedule) if !state.is_terminal() => state,
        (JobState::Failed, JobEvent::Annotate) => JobState::Failed,

        (JobState::Failed, JobEvent::Recover(stage)) => stage.running_state(),

        (from_state, _) => {
            return Err(StateMachineError::InvalidTransition {
                from: Some(from_state.to_string()),
                to: format!("{event:?}"),
            })
        }
    };

    Ok(target)
}

/// Transition driver shared by live processing, recovery and housekeeping. Every state
/// change goes through [`JobStateMachine::transition`], which persists via the store's
/// compare-and-set so concurrent callers resolve to exactly one winner.
#[derive(Clone)]
pub struct JobStateMachine {
    store: Arc<dyn JobStore>,
}

impl JobStateMachine {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Apply `event` to the snapshot `job`. Returns `Conflict` when the persisted job no
    /// longer matches the snapshot's state and version.
    pub async fn transition(&self, job: &Job, event: JobEvent, patch: JobPatch) -> Result<CasOutcome> {
        let target = determine_target_state(job.state, &event)?;
        self.check_guards(job, &event)?;

        let outcome = self
            .store
            .compare_and_set_state(job.id, job.state, job.version, target, patch)
            .await?;

        match &outcome {
            CasOutcome::Applied(updated) => {
                log_job_transition(
                    job.id,
                    &job.correlation_id,
                    &job.state.to_string(),
                    &updated.state.to_string(),
                    event.event_type(),
                );
            }
            CasOutcome::Conflict { current } => {
                debug!(
                    job_id = job.id,
                    event = event.event_type(),
                    expected_state = %job.state,
                    expected_version = job.version,
                    current_state = ?current.as_ref().map(|j| j.state),
                    "Transition lost compare-and-set race"
                );
            }
        }

        Ok(outcome)
    }

    fn check_guards(&self, job: &Job, event: &JobEvent) -> StateMachineResult<()> {
        if job.revoked && !event.allowed_after_revoke() {
            return Err(StateMachineError::GuardFailed {
                reason: format!("job {} has been revoked", job.id),
            });
        }
        if matches!(event, JobEvent::Annotate) && !job.state.is_error() {
            return Err(StateMachineError::GuardFailed {
                reason: "only failed jobs can be annotated".to_string(),
            });
        }
        Ok(())
    }
}
