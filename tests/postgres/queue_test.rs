use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashSet;
use std::time::Duration;

use stagehand::queue::{DelayedQueue, PostgresDelayedQueue, WorkItem, WorkReason};

#[sqlx::test(migrator = "stagehand::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_only_due_items_are_claimed(pool: PgPool) {
    let queue = PostgresDelayedQueue::new(pool);
    let due = WorkItem::now(1, WorkReason::Submit);
    let later = WorkItem::after(2, WorkReason::Retry, Duration::from_secs(300));
    queue.schedule(due.clone()).await.unwrap();
    queue.schedule(later.clone()).await.unwrap();

    let claimed = queue.claim_due(10, Duration::from_secs(60)).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, due.id);
    assert_eq!(claimed[0].reason, WorkReason::Submit);
    assert_eq!(claimed[0].attempts, 1);

    // claimed and not yet acknowledged: invisible, but still counted
    assert!(queue.claim_due(10, Duration::from_secs(60)).await.unwrap().is_empty());
    assert_eq!(queue.len().await.unwrap(), 2);
    let pending: Vec<_> = queue.pending().await.unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(pending, [later.id]);

    assert!(queue.ack(due.id).await.unwrap());
    assert!(!queue.ack(due.id).await.unwrap());
    assert_eq!(queue.len().await.unwrap(), 1);
    assert!(queue.next_run_at().await.unwrap().is_some_and(|at| at > Utc::now()));
}

#[sqlx::test(migrator = "stagehand::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_unacknowledged_claim_is_redelivered(pool: PgPool) {
    let queue = PostgresDelayedQueue::new(pool);
    let item = WorkItem::now(7, WorkReason::StageAdvance);
    queue.schedule(item.clone()).await.unwrap();

    let first = queue.claim_due(1, Duration::from_millis(200)).await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let second = queue.claim_due(1, Duration::from_secs(60)).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, item.id);
    assert_eq!(second[0].attempts, 2);
}

#[sqlx::test(migrator = "stagehand::database::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_claims_never_share_an_item(pool: PgPool) {
    let queue = PostgresDelayedQueue::new(pool);
    for job_id in 0..20 {
        queue
            .schedule(WorkItem::now(job_id, WorkReason::Submit))
            .await
            .unwrap();
    }

    let visibility = Duration::from_secs(60);
    let (a, b, c) = tokio::join!(
        queue.claim_due(8, visibility),
        queue.claim_due(8, visibility),
        queue.claim_due(8, visibility)
    );
    let claimed: Vec<_> = [a.unwrap(), b.unwrap(), c.unwrap()]
        .into_iter()
        .flatten()
        .map(|item| item.id)
        .collect();
    let distinct: HashSet<_> = claimed.iter().collect();

    assert_eq!(distinct.len(), claimed.len());
    assert!(claimed.len() <= 20);
}
