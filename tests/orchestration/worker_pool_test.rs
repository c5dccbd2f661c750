use std::sync::Arc;
use std::time::Duration;

use stagehand::config::OrchestratorConfig;
use stagehand::models::NewJob;
use stagehand::orchestration::{ErrorKind, WorkerPool};
use stagehand::queue::DelayedQueue;
use stagehand::state_machine::{JobState, Stage};
use tokio_util::sync::CancellationToken;

use crate::common::{executors_with, stage_error, ScriptedExecutor, TestHarness};

#[tokio::test]
async fn test_run_once_drains_a_batch_of_jobs() {
    let harness = TestHarness::new(executors_with(vec![]));
    let pool = WorkerPool::new(harness.orchestrator.clone());

    let mut ids = Vec::new();
    for n in 0..3 {
        let (id, _) = harness
            .orchestrator
            .submit(NewJob::new(format!("img://{n}"), "owner-1"))
            .await
            .unwrap();
        ids.push(id);
    }

    for _ in 0..10 {
        let report = pool.run_once().await.unwrap();
        assert_eq!(report.failed, 0);
        if report.claimed == 0 {
            break;
        }
    }

    for id in ids {
        assert_eq!(harness.job(id).await.state, JobState::Completed);
    }
    assert!(harness.queue.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_immediate_retry_is_picked_up_again() {
    let lookup = ScriptedExecutor::with(
        "lookup-ref",
        vec![stage_error(ErrorKind::ReadTimeout, "read timeout from carrier")],
    );
    let harness = TestHarness::new(executors_with(vec![(Stage::Lookup, lookup.clone())]));
    let pool = WorkerPool::new(harness.orchestrator.clone());
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();

    for _ in 0..10 {
        if pool.run_once().await.unwrap().claimed == 0 {
            break;
        }
    }
    let job = harness.job(id).await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(lookup.calls(), 2);
}

#[tokio::test]
async fn test_run_processes_until_cancelled() {
    let config = OrchestratorConfig {
        poll_interval_ms: 20,
        ..OrchestratorConfig::default()
    };
    let harness = TestHarness::with_config(executors_with(vec![]), config);
    let pool = Arc::new(WorkerPool::new(harness.orchestrator.clone()));
    let (id, _) = harness
        .orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let running = {
        let pool = pool.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pool.run(cancel).await })
    };

    let completed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if harness.job(id).await.state == JobState::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(completed.is_ok(), "job should complete while the pool runs");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
}
