use sqlx::PgPool;
use std::sync::Arc;

use stagehand::config::OrchestratorConfig;
use stagehand::models::{JobFilter, JobPatch, NewJob};
use stagehand::notifications::NotificationHub;
use stagehand::orchestration::{ErrorCategory, Orchestrator, RetryDecisionEngine, WorkerPool};
use stagehand::queue::{DelayedQueue, PostgresDelayedQueue};
use stagehand::state_machine::{JobState, Stage};
use stagehand::store::{CasOutcome, JobStore, PostgresJobStore};

use crate::common::executors_with;

#[sqlx::test(migrator = "stagehand::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_create_and_lookup(pool: PgPool) {
    let store = PostgresJobStore::new(pool);
    let job = store
        .create(NewJob::new("img://parcel", "owner-1").with_kind("document"))
        .await
        .unwrap();

    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.version, 0);
    assert_eq!(job.job_kind, "document");
    assert!(job.correlation_id.starts_with("job_"));

    let by_id = store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(by_id, job);
    let by_correlation = store
        .get_by_correlation_id(&job.correlation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_correlation.id, job.id);
    assert!(store.get_by_id(job.id + 1000).await.unwrap().is_none());
}

#[sqlx::test(migrator = "stagehand::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_compare_and_set_applies_patch_and_rejects_stale_version(pool: PgPool) {
    let store = PostgresJobStore::new(pool);
    let job = store.create(NewJob::new("img://1", "owner-1")).await.unwrap();

    let outcome = store
        .compare_and_set_state(
            job.id,
            JobState::Pending,
            job.version,
            JobState::Stage1Running,
            JobPatch::new()
                .payload_ref(Stage::Recognition, "rec-1")
                .error("connection reset", ErrorCategory::NetworkError),
        )
        .await
        .unwrap();
    let updated = outcome.applied().cloned().unwrap();
    assert_eq!(updated.state, JobState::Stage1Running);
    assert_eq!(updated.version, job.version + 1);
    assert_eq!(updated.payload_refs.recognition.as_deref(), Some("rec-1"));
    assert_eq!(updated.error_category, Some(ErrorCategory::NetworkError));

    // same expected state as before but the version has moved on
    let stale = store
        .compare_and_set_state(
            job.id,
            JobState::Pending,
            job.version,
            JobState::Stage1Running,
            JobPatch::new(),
        )
        .await
        .unwrap();
    match stale {
        CasOutcome::Conflict { current: Some(current) } => assert_eq!(current, updated),
        other => panic!("expected a conflict, got {other:?}"),
    }

    let missing = store
        .compare_and_set_state(job.id + 1000, JobState::Pending, 0, JobState::Failed, JobPatch::new())
        .await
        .unwrap();
    assert_eq!(missing, CasOutcome::Conflict { current: None });
}

#[sqlx::test(migrator = "stagehand::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_compare_and_set_commits_once(pool: PgPool) {
    let store = PostgresJobStore::new(pool);
    let job = store.create(NewJob::new("img://1", "owner-1")).await.unwrap();

    let (a, b) = tokio::join!(
        store.compare_and_set_state(
            job.id,
            JobState::Pending,
            job.version,
            JobState::Stage1Running,
            JobPatch::new(),
        ),
        store.compare_and_set_state(
            job.id,
            JobState::Pending,
            job.version,
            JobState::Failed,
            JobPatch::new(),
        )
    );
    let applied = [a.unwrap(), b.unwrap()]
        .iter()
        .filter(|outcome| outcome.is_applied())
        .count();
    assert_eq!(applied, 1);

    let persisted = store.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(persisted.version, job.version + 1);
}

#[sqlx::test(migrator = "stagehand::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_filters_counts_and_purge(pool: PgPool) {
    let store = PostgresJobStore::new(pool);
    let mut ids = Vec::new();
    for n in 0..3 {
        let job = store
            .create(NewJob::new(format!("img://{n}"), format!("owner-{}", n % 2)))
            .await
            .unwrap();
        ids.push(job);
    }
    store
        .compare_and_set_state(
            ids[0].id,
            JobState::Pending,
            ids[0].version,
            JobState::Stage1Running,
            JobPatch::new(),
        )
        .await
        .unwrap();

    let pending = store
        .list_by_filter(&JobFilter::new().states([JobState::Pending]))
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);

    let owned = store
        .list_by_filter(&JobFilter::new().owner("owner-0"))
        .await
        .unwrap();
    assert_eq!(owned.len(), 2);

    let limited = store.list_by_filter(&JobFilter::new().limit(1)).await.unwrap();
    assert_eq!(limited.len(), 1);

    let counts = store.count_by_state().await.unwrap();
    assert_eq!(counts.get(&JobState::Pending), Some(&2));
    assert_eq!(counts.get(&JobState::Stage1Running), Some(&1));

    let purged = store
        .purge(&JobFilter::new().states([JobState::Stage1Running]))
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(store.get_by_id(ids[0].id).await.unwrap().is_none());
}

#[sqlx::test(migrator = "stagehand::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_job_completes_over_postgres_backends(pool: PgPool) {
    let store = Arc::new(PostgresJobStore::new(pool.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        Arc::new(PostgresDelayedQueue::new(pool)),
        executors_with(vec![]),
        Arc::new(RetryDecisionEngine::default().without_jitter()),
        Arc::new(NotificationHub::default()),
        OrchestratorConfig::default(),
    ));
    let workers = WorkerPool::new(orchestrator.clone());

    let (id, _) = orchestrator
        .submit(NewJob::new("img://1", "owner-1"))
        .await
        .unwrap();
    for _ in 0..10 {
        if workers.run_once().await.unwrap().claimed == 0 {
            break;
        }
    }

    let job = store.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.payload_refs.document.as_deref(), Some("document-ref"));
    assert_eq!(orchestrator.queue().len().await.unwrap(), 0);
}
