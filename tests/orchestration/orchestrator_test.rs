use std::time::Duration;

use stagehand::config::OrchestratorConfig;
use stagehand::constants::events;
use stagehand::models::NewJob;
use stagehand::orchestration::{AdvanceOutcome, ErrorCategory, ErrorKind, NoOpReason, StageOutcome};
use stagehand::state_machine::{JobState, Stage};

use crate::common::{executors_with, stage_error, ScriptedExecutor, TestHarness};

#[tokio::test]
async fn test_job_walks_all_stages_with_progress() {
    let harness = TestHarness::new(executors_with(vec![]));
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://parcel", "owner-1"))
        .await
        .unwrap();

    let mut states = Vec::new();
    for _ in 0..4 {
        harness.orchestrator.advance(id).await.unwrap();
        states.push(harness.job(id).await.state);
    }
    assert_eq!(
        states,
        [
            JobState::Stage2Running,
            JobState::Stage3Running,
            JobState::Stage3Done,
            JobState::Completed
        ]
    );

    let job = harness.job(id).await;
    assert_eq!(job.payload_refs.recognition.as_deref(), Some("recognition-ref"));
    assert_eq!(job.payload_refs.lookup.as_deref(), Some("lookup-ref"));
    assert_eq!(job.payload_refs.confirmation.as_deref(), Some("confirmation-ref"));
    assert_eq!(job.payload_refs.document.as_deref(), Some("document-ref"));
    assert_eq!(job.progress_percent(), 100);
}

#[tokio::test]
async fn test_network_retries_exhaust_then_fail() {
    let failures = (0..6)
        .map(|_| stage_error(ErrorKind::Connection, "connection reset by peer"))
        .collect();
    let lookup = ScriptedExecutor::with("lookup-ref", failures);
    let harness = TestHarness::new(executors_with(vec![(Stage::Lookup, lookup.clone())]));
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();

    harness.orchestrator.advance(id).await.unwrap();
    for attempt in 1..=5 {
        assert_eq!(
            harness.orchestrator.advance(id).await.unwrap(),
            AdvanceOutcome::RetryScheduled {
                category: ErrorCategory::NetworkError,
                delay: Duration::ZERO,
                attempt,
            }
        );
    }
    assert_eq!(
        harness.orchestrator.advance(id).await.unwrap(),
        AdvanceOutcome::Failed {
            category: ErrorCategory::NetworkError
        }
    );

    let job = harness.job(id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.retry_count, 5);
    assert_eq!(job.error_message.as_deref(), Some("connection reset by peer"));
    assert_eq!(lookup.calls(), 6);
}

#[tokio::test]
async fn test_rate_limit_waits_fixed_delay() {
    let lookup = ScriptedExecutor::with(
        "lookup-ref",
        vec![stage_error(ErrorKind::Http, "carrier answered: too many requests")],
    );
    let harness = TestHarness::new(executors_with(vec![(Stage::Lookup, lookup)]));
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();

    harness.orchestrator.advance(id).await.unwrap();
    assert_eq!(
        harness.orchestrator.advance(id).await.unwrap(),
        AdvanceOutcome::RetryScheduled {
            category: ErrorCategory::ApiRateLimit,
            delay: Duration::from_secs(300),
            attempt: 1,
        }
    );
    let job = harness.job(id).await;
    assert_eq!(job.state, JobState::Stage2Running);
    assert!(job.next_attempt_at.is_some());
}

#[tokio::test]
async fn test_duplicate_dispatch_during_rate_limit_backoff_waits() {
    let lookup = ScriptedExecutor::with(
        "lookup-ref",
        vec![stage_error(ErrorKind::Http, "HTTP 429: rate limit reached")],
    );
    let harness = TestHarness::new(executors_with(vec![(Stage::Lookup, lookup.clone())]));
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();

    harness.orchestrator.advance(id).await.unwrap();
    assert!(matches!(
        harness.orchestrator.advance(id).await.unwrap(),
        AdvanceOutcome::RetryScheduled {
            category: ErrorCategory::ApiRateLimit,
            attempt: 1,
            ..
        }
    ));
    let backing_off = harness.job(id).await;

    // a second delivery before the 300s wait is over does nothing
    assert_eq!(
        harness.orchestrator.advance(id).await.unwrap(),
        AdvanceOutcome::NoOp(NoOpReason::NotDue)
    );
    assert_eq!(lookup.calls(), 1);
    let job = harness.job(id).await;
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.version, backing_off.version);

    // once the wait elapses the retry runs and succeeds
    harness.make_due(id).await;
    assert!(matches!(
        harness.orchestrator.advance(id).await.unwrap(),
        AdvanceOutcome::Advanced {
            from: JobState::Stage2Running,
            to: JobState::Stage3Running
        }
    ));
    assert_eq!(lookup.calls(), 2);
    assert_eq!(harness.job(id).await.retry_count, 0);
}

#[tokio::test]
async fn test_stage_timeout_is_a_temporary_error() {
    let config = OrchestratorConfig {
        stage_timeout_secs: 1,
        ..OrchestratorConfig::default()
    };
    let recognition = ScriptedExecutor::slow("recognition-ref", Duration::from_secs(3));
    let harness = TestHarness::with_config(
        executors_with(vec![(Stage::Recognition, recognition)]),
        config,
    );
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();

    assert_eq!(
        harness.orchestrator.advance(id).await.unwrap(),
        AdvanceOutcome::RetryScheduled {
            category: ErrorCategory::TemporaryError,
            delay: Duration::from_secs(60),
            attempt: 1,
        }
    );
    let job = harness.job(id).await;
    assert!(job
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("execution budget")));
}

#[tokio::test]
async fn test_generation_cannot_return() {
    let generation = ScriptedExecutor::with("document-ref", vec![Ok(StageOutcome::Returned)]);
    let harness = TestHarness::new(executors_with(vec![(Stage::Generation, generation)]));
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();

    let job = harness.drive(id, 10).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error_category, Some(ErrorCategory::PermanentError));
}

#[tokio::test]
async fn test_revoke_during_stage_discards_result() {
    let lookup = ScriptedExecutor::slow("lookup-ref", Duration::from_millis(300));
    let harness = TestHarness::new(executors_with(vec![(Stage::Lookup, lookup)]));
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();
    harness.orchestrator.advance(id).await.unwrap();

    let orchestrator = harness.orchestrator.clone();
    let advancing = tokio::spawn(async move { orchestrator.advance(id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.orchestrator.revoke(id).await.unwrap());

    assert_eq!(
        advancing.await.unwrap().unwrap(),
        AdvanceOutcome::NoOp(NoOpReason::Revoked)
    );
    let job = harness.job(id).await;
    assert_eq!(job.state, JobState::Failed);
    assert!(job.revoked);
    assert!(job.payload_refs.lookup.is_none());
}

#[tokio::test]
async fn test_concurrent_advances_commit_once() {
    let recognition = ScriptedExecutor::slow("recognition-ref", Duration::from_millis(50));
    let harness = TestHarness::new(executors_with(vec![(Stage::Recognition, recognition)]));
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        harness.orchestrator.advance(id),
        harness.orchestrator.advance(id)
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let advanced = outcomes
        .iter()
        .filter(|o| matches!(o, AdvanceOutcome::Advanced { .. }))
        .count();
    let conflicts = outcomes
        .iter()
        .filter(|o| **o == AdvanceOutcome::NoOp(NoOpReason::Conflict))
        .count();
    assert_eq!((advanced, conflicts), (1, 1));
    assert_eq!(harness.job(id).await.state, JobState::Stage2Running);
}

#[tokio::test]
async fn test_owner_receives_progress_events() {
    let harness = TestHarness::new(executors_with(vec![]));
    let mut connection = harness.hub.connect("owner-7").unwrap();
    let (id, correlation_id) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-7"))
        .await
        .unwrap();
    harness.drive(id, 10).await;

    let mut frames = Vec::new();
    while let Some(frame) = connection.try_recv() {
        frames.push(frame);
    }
    assert_eq!(frames[0].message_type, events::CONNECTION);
    assert_eq!(frames[1].message_type, events::JOB_SUBMITTED);
    let last = frames.last().unwrap();
    assert_eq!(last.message_type, events::JOB_COMPLETED);
    assert_eq!(last.job_id, Some(id));
    assert_eq!(last.progress, Some(100));

    let progress: Vec<u8> = frames.iter().filter_map(|f| f.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));

    let status = harness
        .orchestrator
        .job_status_by_correlation_id(&correlation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.state, JobState::Completed);
}

#[tokio::test]
async fn test_advance_on_missing_executor_is_an_error() {
    let harness = TestHarness::new(stagehand::orchestration::StageExecutors::new());
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();
    assert!(harness.orchestrator.advance(id).await.is_err());
}
