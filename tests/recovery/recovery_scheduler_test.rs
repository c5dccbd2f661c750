use std::time::Duration;

use stagehand::constants::events;
use stagehand::models::NewJob;
use stagehand::notifications::NoticeSeverity;
use stagehand::orchestration::ErrorCategory;
use stagehand::queue::{DelayedQueue, WorkReason};
use stagehand::recovery::{FailureCategory, NotificationAudience, RecoveryOutcome};
use stagehand::state_machine::{JobState, Stage};

use crate::common::{executors_with, failed_job, TestHarness};

fn seed_categories(harness: &TestHarness) {
    let jobs = [
        failed_job(1, "Connection timeout while contacting carrier", Some(ErrorCategory::NetworkError), 0, 10),
        failed_job(2, "No space left on device", Some(ErrorCategory::SystemError), 0, 10),
        failed_job(3, "deadlock detected while saving result", Some(ErrorCategory::TemporaryError), 1, 10),
        failed_job(4, "Invalid data format in uploaded image", Some(ErrorCategory::DataError), 0, 10),
        failed_job(5, "API key invalid for provider", None, 0, 10),
        failed_job(6, "Tracking number invalid", Some(ErrorCategory::PermanentError), 0, 10),
        failed_job(7, "something odd happened", None, 0, 10),
        // attempts exhausted, never scanned
        failed_job(8, "Connection timeout while contacting carrier", Some(ErrorCategory::NetworkError), 3, 10),
    ];
    for job in jobs {
        harness.store.insert_raw(job);
    }
}

#[tokio::test]
async fn test_scan_handles_every_category() {
    let harness = TestHarness::new(executors_with(vec![]));
    seed_categories(&harness);
    let mut operator = harness.hub.subscribe_operator();
    let mut owner = harness.hub.connect("owner-6").unwrap();

    let report = harness.recovery().run_once().await.unwrap();
    assert_eq!(report.scanned, 7);
    assert_eq!(report.recovered, 3);
    assert_eq!(report.notified, 3);
    assert_eq!(report.manual_review, 1);
    assert_eq!(report.errors, 0);

    let network = harness.job(1).await;
    assert_eq!(network.state, JobState::Stage2Running);
    assert_eq!(network.recovery_attempts, 1);
    assert_eq!(network.retry_count, 0);
    assert_eq!(network.failure_category, Some(FailureCategory::RecoverableNetwork));

    // second recovery of job 3 doubles the temporary base delay
    let temporary = report.results.iter().find(|r| r.job_id == 3).unwrap();
    assert_eq!(
        temporary.outcome,
        Some(RecoveryOutcome::Recovered {
            stage: Stage::Lookup,
            delay: Duration::from_secs(360),
        })
    );

    let data = harness.job(4).await;
    assert_eq!(data.state, JobState::Failed);
    assert!(data.failure_notified);
    assert_eq!(data.failure_category, Some(FailureCategory::UnrecoverableData));

    let config = harness.job(5).await;
    assert!(config.failure_notified);
    assert_eq!(config.recovery_attempts, 0);

    let business = report.results.iter().find(|r| r.job_id == 6).unwrap();
    assert_eq!(
        business.outcome,
        Some(RecoveryOutcome::Notified {
            audience: NotificationAudience::Owner
        })
    );

    let unknown = harness.job(7).await;
    assert!(unknown.manual_review);
    assert!(unknown.review_notes.as_deref().is_some_and(|n| n.contains("failure_analysis_uncertain")));

    let untouched = harness.job(8).await;
    assert_eq!(untouched.recovery_attempts, 3);
    assert_eq!(untouched.state, JobState::Failed);

    let first = operator.try_recv().unwrap();
    let second = operator.try_recv().unwrap();
    assert_eq!(first.severity, NoticeSeverity::Critical);
    let mut alerted = [first.job_id, second.job_id];
    alerted.sort();
    assert_eq!(alerted, [Some(4), Some(5)]);

    let mut owner_frames = Vec::new();
    while let Some(frame) = owner.try_recv() {
        owner_frames.push(frame.message_type);
    }
    assert!(owner_frames.iter().any(|t| t == events::JOB_ATTENTION_REQUIRED));
}

#[tokio::test]
async fn test_second_scan_finds_nothing_new() {
    let harness = TestHarness::new(executors_with(vec![]));
    seed_categories(&harness);
    let recovery = harness.recovery();

    recovery.run_once().await.unwrap();
    let again = recovery.run_once().await.unwrap();
    assert_eq!(again.scanned, 0);
}

#[tokio::test]
async fn test_recently_failed_and_stale_jobs_are_not_scanned() {
    let harness = TestHarness::new(executors_with(vec![]));
    harness.store.insert_raw(failed_job(1, "Connection timeout", None, 0, 1));
    harness.store.insert_raw(failed_job(2, "Connection timeout", None, 0, 60 * 48));

    let report = harness.recovery().run_once().await.unwrap();
    assert_eq!(report.scanned, 0);
}

#[tokio::test]
async fn test_recovery_schedules_a_work_item() {
    let harness = TestHarness::new(executors_with(vec![]));
    harness.store.insert_raw(failed_job(1, "Connection refused", None, 0, 10));

    harness.recovery().run_once().await.unwrap();
    let pending = harness.queue.pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].job_id, 1);
    assert_eq!(pending[0].reason, WorkReason::Recovery);
}

#[tokio::test]
async fn test_recovered_job_completes() {
    let harness = TestHarness::new(executors_with(vec![]));
    harness.store.insert_raw(failed_job(1, "Connection timeout", None, 0, 10));

    harness.recovery().run_once().await.unwrap();
    let job = harness.drive(1, 10).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.payload_refs.recognition.as_deref(), Some("recognition-1"));
    assert_eq!(job.recovery_attempts, 1);
}

#[tokio::test]
async fn test_manual_recovery_respects_cap_unless_forced() {
    let harness = TestHarness::new(executors_with(vec![]));
    harness.store.insert_raw(failed_job(1, "Invalid data format", Some(ErrorCategory::DataError), 3, 10));
    let recovery = harness.recovery();

    assert!(matches!(
        recovery.recover_job(1, false).await.unwrap(),
        RecoveryOutcome::Skipped { .. }
    ));
    assert_eq!(
        recovery.recover_job(1, true).await.unwrap(),
        RecoveryOutcome::Recovered {
            stage: Stage::Lookup,
            delay: Duration::ZERO,
        }
    );
    let job = harness.job(1).await;
    assert_eq!(job.state, JobState::Stage2Running);
    assert_eq!(job.recovery_attempts, 4);
}

#[tokio::test]
async fn test_manual_recovery_skips_live_jobs() {
    let harness = TestHarness::new(executors_with(vec![]));
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();
    assert!(matches!(
        harness.recovery().recover_job(id, true).await.unwrap(),
        RecoveryOutcome::Skipped { .. }
    ));
}

#[tokio::test]
async fn test_failure_patterns_report() {
    let harness = TestHarness::new(executors_with(vec![]));
    seed_categories(&harness);

    let report = harness.recovery().analyze_failure_patterns(7).await.unwrap();
    assert_eq!(report.total_failures, 8);
    assert_eq!(report.category_distribution.get("recoverable_network"), Some(&2));
    assert_eq!(report.job_kind_failures.get("tracking"), Some(&8));
    assert_eq!(report.top_error_patterns[0].1, 2);
    assert!(!report.insights.is_empty());
}
