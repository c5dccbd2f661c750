use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use stagehand::config::{HousekeepingConfig, StagehandConfig};
use stagehand::housekeeping::{
    CleanupTask, HousekeepingScheduler, PeriodicTask, StatisticsTask, StuckJobSweep, TimeoutSweep,
};
use stagehand::models::{Job, NewJob};
use stagehand::orchestration::ErrorCategory;
use stagehand::queue::{DelayedQueue, WorkReason};
use stagehand::state_machine::JobState;

use crate::common::{executors_with, failed_job, TestHarness};

fn job_in(id: i64, state: JobState, created_minutes_ago: i64, updated_minutes_ago: i64) -> Job {
    let now = Utc::now();
    let mut job = Job::from_new(
        id,
        NewJob::new(format!("img://{id}"), "owner-1"),
        now - ChronoDuration::minutes(created_minutes_ago),
    );
    job.state = state;
    job.updated_at = now - ChronoDuration::minutes(updated_minutes_ago);
    job
}

#[tokio::test]
async fn test_stuck_sweep_readvances_or_fails() {
    let harness = TestHarness::new(executors_with(vec![]));
    // stuck, young, retries left
    harness.store.insert_raw(job_in(1, JobState::Stage2Running, 60, 40));
    // stuck with retries used up
    let mut exhausted = job_in(2, JobState::Stage3Running, 60, 40);
    exhausted.retry_count = 3;
    harness.store.insert_raw(exhausted);
    // stuck for too long overall
    harness.store.insert_raw(job_in(3, JobState::Stage1Running, 60 * 30, 40));
    // held on purpose
    let mut held = job_in(4, JobState::Stage3Running, 60, 40);
    held.next_attempt_at = Some(Utc::now() + ChronoDuration::minutes(30));
    harness.store.insert_raw(held);
    // recently active
    harness.store.insert_raw(job_in(5, JobState::Stage2Running, 60, 1));

    let sweep = StuckJobSweep::new(harness.orchestrator.clone(), HousekeepingConfig::default());
    let report = sweep.sweep().await.unwrap();
    assert_eq!(report.examined, 4);
    assert_eq!(report.readvanced, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(report.skipped, 1);

    let readvanced = harness.job(1).await;
    assert_eq!(readvanced.state, JobState::Stage2Running);
    assert_eq!(readvanced.retry_count, 1);
    let pending = harness.queue.pending().await.unwrap();
    assert!(pending
        .iter()
        .any(|item| item.job_id == 1 && item.reason == WorkReason::StuckSweep));

    for id in [2, 3] {
        let job = harness.job(id).await;
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error_category, Some(ErrorCategory::TemporaryError));
        assert!(job.error_message.as_deref().is_some_and(|m| m.contains("stuck")));
    }
    assert_eq!(harness.job(4).await.state, JobState::Stage3Running);
    assert_eq!(harness.job(5).await.state, JobState::Stage2Running);
}

#[tokio::test]
async fn test_timeout_sweep_fails_jobs_past_lifetime() {
    let harness = TestHarness::new(executors_with(vec![]));
    let mut ancient = job_in(1, JobState::Stage3Running, 60 * 24 * 8, 5);
    ancient.next_attempt_at = Some(Utc::now() + ChronoDuration::hours(1));
    harness.store.insert_raw(ancient);
    harness.store.insert_raw(job_in(2, JobState::Stage3Running, 60 * 24, 5));
    harness.store.insert_raw(job_in(3, JobState::Completed, 60 * 24 * 8, 60 * 24 * 8));

    let sweep = TimeoutSweep::new(harness.orchestrator.clone(), HousekeepingConfig::default());
    let report = sweep.sweep().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.failed, 1);

    let job = harness.job(1).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error_category, Some(ErrorCategory::PermanentError));
    assert!(job.next_attempt_at.is_none());
    assert_eq!(harness.job(2).await.state, JobState::Stage3Running);
}

#[tokio::test]
async fn test_cleanup_honors_retention() {
    let harness = TestHarness::new(executors_with(vec![]));
    let day = 60 * 24;
    harness.store.insert_raw(job_in(1, JobState::Completed, 40 * day, 31 * day));
    harness.store.insert_raw(job_in(2, JobState::Completed, 40 * day, 10 * day));
    harness.store.insert_raw(job_in(3, JobState::Returned, 40 * day, 35 * day));
    harness.store.insert_raw(failed_job(4, "boom", None, 0, 8 * day));
    harness.store.insert_raw(failed_job(5, "boom", None, 0, 2 * day));
    harness.store.insert_raw(job_in(6, JobState::Stage2Running, 40 * day, 40 * day));

    let output = CleanupTask::new(harness.orchestrator.clone(), HousekeepingConfig::default())
        .run()
        .await
        .unwrap();
    assert_eq!(output["purged_finished"], 2);
    assert_eq!(output["purged_failed"], 1);

    let store = harness.orchestrator.store();
    for (id, kept) in [(1, false), (2, true), (3, false), (4, false), (5, true), (6, true)] {
        assert_eq!(store.get_by_id(id).await.unwrap().is_some(), kept, "job {id}");
    }
}

#[tokio::test]
async fn test_statistics_summarize_jobs() {
    let harness = TestHarness::new(executors_with(vec![]));
    harness.store.insert_raw(job_in(1, JobState::Completed, 60, 30));
    harness.store.insert_raw(job_in(2, JobState::Completed, 60, 30));
    harness.store.insert_raw(job_in(3, JobState::Returned, 60, 30));
    let mut failed = failed_job(4, "Connection timeout", Some(ErrorCategory::NetworkError), 0, 30);
    failed.retry_count = 5;
    harness.store.insert_raw(failed);

    let stats = StatisticsTask::new(harness.orchestrator.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(stats["total_jobs"], 4);
    assert_eq!(stats["success_rate"], 0.75);
    assert_eq!(stats["by_state"]["completed"], 2);
    assert_eq!(stats["retry_distribution"]["5"], 1);
    assert_eq!(stats["recent_failure_categories"]["network_error"], 1);
    assert!(!stats["insights"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_default_schedule() {
    let harness = TestHarness::new(executors_with(vec![]));
    let recovery = Arc::new(harness.recovery());
    let scheduler = HousekeepingScheduler::with_default_tasks(
        harness.orchestrator.clone(),
        recovery,
        &StagehandConfig::default().housekeeping,
    );

    let mut specs = scheduler.specs();
    specs.sort_by(|a, b| b.priority.cmp(&a.priority));
    let summary: Vec<(&str, &str, u8)> = specs
        .iter()
        .map(|s| (s.name.as_str(), s.target_queue.as_str(), s.priority))
        .collect();
    assert_eq!(
        summary,
        [
            ("sweep-stuck-jobs", "high_priority", 9),
            ("scan-failed-jobs", "recovery", 7),
            ("sweep-timeouts", "tracking", 6),
            ("generate-statistics", "reporting", 3),
            ("cleanup-jobs", "maintenance", 2),
        ]
    );

    let report = scheduler.trigger("scan-failed-jobs").await.unwrap();
    assert!(report.success);
    assert_eq!(report.output.unwrap()["scanned"], 0);
}
