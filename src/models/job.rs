//! # Job Model
//!
//! The unit of orchestrated multi-stage work.
//!
//! ## Overview
//!
//! A `Job` is created in `Pending` by [`crate::orchestration::Orchestrator::submit`] and
//! afterwards only changes through state machine transitions. Each transition carries a
//! [`JobPatch`] with the field updates that must land atomically with the state change,
//! and bumps `version`, the token the store's compare-and-set checks.
//!
//! ## Payload refs
//!
//! Stage executors return opaque references to their outputs (object keys, row ids).
//! The engine stores them per stage and never interprets them beyond presence, which
//! drives the resume point and the progress shown for failed jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CORRELATION_ID_PREFIX, DEFAULT_JOB_KIND};
use crate::orchestration::ErrorCategory;
use crate::recovery::FailureCategory;
use crate::state_machine::{JobState, Stage};

/// Owner of a job and recipient of its push notifications
pub type SubjectId = String;

/// Opaque stage output references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadRefs {
    pub recognition: Option<String>,
    pub lookup: Option<String>,
    pub confirmation: Option<String>,
    pub document: Option<String>,
}

impl PayloadRefs {
    pub fn get(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Recognition => self.recognition.as_deref(),
            Stage::Lookup => self.lookup.as_deref(),
            Stage::Confirmation => self.confirmation.as_deref(),
            Stage::Generation => self.document.as_deref(),
        }
    }

    pub fn set(&mut self, stage: Stage, reference: String) {
        let slot = match stage {
            Stage::Recognition => &mut self.recognition,
            Stage::Lookup => &mut self.lookup,
            Stage::Confirmation => &mut self.confirmation,
            Stage::Generation => &mut self.document,
        };
        *slot = Some(reference);
    }

    /// Furthest stage with a recorded output
    pub fn highest_populated(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .rev()
            .find(|stage| self.get(*stage).is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub correlation_id: String,
    pub owner: SubjectId,
    /// Selects per-kind retry strategies and keys the error history
    pub job_kind: String,
    pub input_ref: String,
    pub state: JobState,
    pub version: i64,
    /// Stage-level retries in the live pipeline, reset when a stage succeeds
    pub retry_count: u32,
    /// Re-injections made by the recovery scheduler
    pub recovery_attempts: u32,
    pub error_message: Option<String>,
    pub error_category: Option<ErrorCategory>,
    /// Last terminal-failure analysis
    pub failure_category: Option<FailureCategory>,
    pub payload_refs: PayloadRefs,
    pub revoked: bool,
    pub failure_notified: bool,
    pub manual_review: bool,
    pub review_notes: Option<String>,
    /// Earliest time the next deferred advance is expected to run
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build the initial record for a submission; `id` is assigned by the store
    pub fn from_new(id: i64, new_job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            correlation_id: generate_correlation_id(),
            owner: new_job.owner,
            job_kind: new_job.job_kind,
            input_ref: new_job.input_ref,
            state: JobState::Pending,
            version: 0,
            retry_count: 0,
            recovery_attempts: 0,
            error_message: None,
            error_category: None,
            failure_category: None,
            payload_refs: PayloadRefs::default(),
            revoked: false,
            failure_notified: false,
            manual_review: false,
            review_notes: None,
            next_attempt_at: None,
            created_at: now,
            started_at: None,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Progress for the owner; failed jobs report how far their outputs got
    pub fn progress_percent(&self) -> u8 {
        match self.state.progress_percent() {
            Some(p) => p,
            None => match self.payload_refs.highest_populated() {
                Some(Stage::Generation) => 90,
                Some(Stage::Confirmation) => 60,
                Some(Stage::Lookup) => 40,
                Some(Stage::Recognition) => 20,
                None => 0,
            },
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Whether a deferred advance is still pending in the future
    pub fn has_pending_attempt(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_some_and(|at| at > now)
    }
}

/// `job_` followed by 12 lowercase hex characters
pub fn generate_correlation_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{CORRELATION_ID_PREFIX}{}", &hex[..12])
}

/// Submission payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub input_ref: String,
    pub owner: SubjectId,
    pub job_kind: String,
}

impl NewJob {
    pub fn new(input_ref: impl Into<String>, owner: impl Into<SubjectId>) -> Self {
        Self {
            input_ref: input_ref.into(),
            owner: owner.into(),
            job_kind: DEFAULT_JOB_KIND.to_string(),
        }
    }

    pub fn with_kind(mut self, job_kind: impl Into<String>) -> Self {
        self.job_kind = job_kind.into();
        self
    }
}

/// Field updates committed atomically with a transition. `None` leaves a field alone;
/// nested options distinguish "clear" from "untouched".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub retry_count: Option<u32>,
    pub recovery_attempts: Option<u32>,
    pub error_message: Option<Option<String>>,
    pub error_category: Option<Option<ErrorCategory>>,
    pub failure_category: Option<Option<FailureCategory>>,
    pub payload_ref: Option<(Stage, String)>,
    pub revoked: Option<bool>,
    pub failure_notified: Option<bool>,
    pub manual_review: Option<bool>,
    pub review_notes: Option<String>,
    pub next_attempt_at: Option<Option<DateTime<Utc>>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn recovery_attempts(mut self, attempts: u32) -> Self {
        self.recovery_attempts = Some(attempts);
        self
    }

    pub fn error(mut self, message: impl Into<String>, category: ErrorCategory) -> Self {
        self.error_message = Some(Some(message.into()));
        self.error_category = Some(Some(category));
        self
    }

    pub fn failure_category(mut self, category: FailureCategory) -> Self {
        self.failure_category = Some(Some(category));
        self
    }

    pub fn payload_ref(mut self, stage: Stage, reference: impl Into<String>) -> Self {
        self.payload_ref = Some((stage, reference.into()));
        self
    }

    pub fn revoked(mut self) -> Self {
        self.revoked = Some(true);
        self
    }

    pub fn failure_notified(mut self) -> Self {
        self.failure_notified = Some(true);
        self
    }

    pub fn manual_review(mut self, notes: impl Into<String>) -> Self {
        self.manual_review = Some(true);
        self.review_notes = Some(notes.into());
        self
    }

    pub fn next_attempt_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_attempt_at = Some(Some(at));
        self
    }

    pub fn clear_next_attempt(mut self) -> Self {
        self.next_attempt_at = Some(None);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Apply the patch plus the state change and version bump
    pub fn apply(&self, job: &mut Job, new_state: JobState, now: DateTime<Utc>) {
        job.state = new_state;
        job.version += 1;
        job.updated_at = now;

        if let Some(count) = self.retry_count {
            job.retry_count = count;
        }
        if let Some(attempts) = self.recovery_attempts {
            job.recovery_attempts = attempts;
        }
        if let Some(message) = &self.error_message {
            job.error_message = message.clone();
        }
        if let Some(category) = self.error_category {
            job.error_category = category;
        }
        if let Some(category) = self.failure_category {
            job.failure_category = category;
        }
        if let Some((stage, reference)) = &self.payload_ref {
            job.payload_refs.set(*stage, reference.clone());
        }
        if let Some(revoked) = self.revoked {
            job.revoked = revoked;
        }
        if let Some(notified) = self.failure_notified {
            job.failure_notified = notified;
        }
        if let Some(flag) = self.manual_review {
            job.manual_review = flag;
        }
        if let Some(notes) = &self.review_notes {
            job.review_notes = Some(notes.clone());
        }
        if let Some(at) = self.next_attempt_at {
            job.next_attempt_at = at;
        }
        if let Some(at) = self.started_at {
            job.started_at.get_or_insert(at);
        }
        if let Some(at) = self.completed_at {
            job.completed_at = Some(at);
        }
    }
}

/// Selection criteria for listing, sweeping and purging jobs. Empty `states` matches
/// every state.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub states: Vec<JobState>,
    pub owner: Option<SubjectId>,
    pub updated_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Only jobs with `recovery_attempts` strictly below this value
    pub recovery_attempts_below: Option<u32>,
    /// Exclude revoked, already-notified and manual-review jobs
    pub exclude_flagged: bool,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(mut self, states: impl IntoIterator<Item = JobState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    pub fn owner(mut self, owner: impl Into<SubjectId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    pub fn updated_after(mut self, at: DateTime<Utc>) -> Self {
        self.updated_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    pub fn recovery_attempts_below(mut self, cap: u32) -> Self {
        self.recovery_attempts_below = Some(cap);
        self
    }

    pub fn exclude_flagged(mut self) -> Self {
        self.exclude_flagged = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        (self.states.is_empty() || self.states.contains(&job.state))
            && self.owner.as_ref().map_or(true, |o| &job.owner == o)
            && self.updated_before.map_or(true, |t| job.updated_at < t)
            && self.updated_after.map_or(true, |t| job.updated_at > t)
            && self.created_before.map_or(true, |t| job.created_at < t)
            && self
                .recovery_attempts_below
                .map_or(true, |cap| job.recovery_attempts < cap)
            && (!self.exclude_flagged
                || !(job.revoked || job.failure_notified || job.manual_review))
    }
}
