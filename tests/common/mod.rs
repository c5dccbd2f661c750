//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stagehand::config::{OrchestratorConfig, StagehandConfig};
use stagehand::models::{Job, NewJob};
use stagehand::notifications::NotificationHub;
use stagehand::orchestration::{
    ErrorCategory, Orchestrator, RetryDecisionEngine, StageError, StageExecutor, StageExecutors,
    StageOutcome,
};
use stagehand::queue::InMemoryDelayedQueue;
use stagehand::recovery::RecoveryScheduler;
use stagehand::state_machine::{JobState, Stage};
use stagehand::store::InMemoryJobStore;

pub type StageResult = Result<StageOutcome, StageError>;

/// Replays scripted outcomes, then advances with a fixed reference
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<StageResult>>,
    reference: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn ok(reference: &str) -> Arc<Self> {
        Self::with(reference, vec![])
    }

    pub fn with(reference: &str, script: Vec<StageResult>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            reference: reference.to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Always sleeps for `delay` before answering
    pub fn slow(reference: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            reference: reference.to_string(),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(&self, _job: &Job) -> StageResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(StageOutcome::Advanced(self.reference.clone())))
    }
}

/// Executors that succeed at every stage except where overridden
pub fn executors_with(overrides: Vec<(Stage, Arc<ScriptedExecutor>)>) -> StageExecutors {
    let mut executors = StageExecutors::new()
        .with(Stage::Recognition, ScriptedExecutor::ok("recognition-ref"))
        .with(Stage::Lookup, ScriptedExecutor::ok("lookup-ref"))
        .with(Stage::Confirmation, ScriptedExecutor::ok("confirmation-ref"))
        .with(Stage::Generation, ScriptedExecutor::ok("document-ref"));
    for (stage, executor) in overrides {
        executors.register(stage, executor);
    }
    executors
}

pub struct TestHarness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<InMemoryJobStore>,
    pub queue: Arc<InMemoryDelayedQueue>,
    pub hub: Arc<NotificationHub>,
}

impl TestHarness {
    pub fn new(executors: StageExecutors) -> Self {
        Self::with_config(executors, OrchestratorConfig::default())
    }

    pub fn with_config(executors: StageExecutors, config: OrchestratorConfig) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryDelayedQueue::new());
        let hub = Arc::new(NotificationHub::default());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            queue.clone(),
            executors,
            Arc::new(RetryDecisionEngine::default().without_jitter()),
            hub.clone(),
            config,
        ));
        Self {
            orchestrator,
            store,
            queue,
            hub,
        }
    }

    pub fn recovery(&self) -> RecoveryScheduler {
        RecoveryScheduler::new(
            self.orchestrator.clone(),
            StagehandConfig::default().recovery,
        )
    }

    pub async fn job(&self, id: i64) -> Job {
        self.orchestrator
            .store()
            .get_by_id(id)
            .await
            .unwrap()
            .expect("job exists")
    }

    /// Pull a pending retry, hold or recovery delay into the past, as if it had elapsed
    pub async fn make_due(&self, id: i64) {
        let mut job = self.job(id).await;
        if job.has_pending_attempt(Utc::now()) {
            job.next_attempt_at = Some(Utc::now() - ChronoDuration::seconds(1));
            self.store.insert_raw(job);
        }
    }

    /// Advance until a terminal state or `limit` calls, letting every delay elapse
    pub async fn drive(&self, id: i64, limit: usize) -> Job {
        for _ in 0..limit {
            let job = self.job(id).await;
            if job.state.is_terminal() {
                return job;
            }
            self.make_due(id).await;
            self.orchestrator.advance(id).await.unwrap();
        }
        self.job(id).await
    }
}

/// A job that failed `minutes_ago` minutes ago with the given error
pub fn failed_job(
    id: i64,
    message: &str,
    category: Option<ErrorCategory>,
    recovery_attempts: u32,
    minutes_ago: i64,
) -> Job {
    let at = Utc::now() - ChronoDuration::minutes(minutes_ago);
    let mut job = Job::from_new(id, NewJob::new(format!("img://{id}"), format!("owner-{id}")), at);
    job.state = JobState::Failed;
    job.version = 3;
    job.error_message = Some(message.to_string());
    job.error_category = category;
    job.recovery_attempts = recovery_attempts;
    job.payload_refs.recognition = Some(format!("recognition-{id}"));
    job.started_at = Some(at);
    job.updated_at = at;
    job
}

pub fn stage_error(kind: stagehand::orchestration::ErrorKind, message: &str) -> StageResult {
    Err(StageError::new(kind, message))
}
