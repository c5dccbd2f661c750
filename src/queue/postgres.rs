//! PostgreSQL-backed delayed queue.
//!
//! Claiming marks rows with `claimed_until` inside a `FOR UPDATE SKIP LOCKED` subquery,
//! so concurrent workers never receive the same item while its claim is live. Rows are
//! deleted on acknowledgement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::{offset_from, DelayedQueue, QueueError, QueueResult, WorkItem, WorkReason};

#[derive(Debug, Clone)]
pub struct PostgresDelayedQueue {
    pool: PgPool,
}

impl PostgresDelayedQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn item_from_row(row: &PgRow) -> QueueResult<WorkItem> {
    let id: Uuid = row.try_get("id")?;
    let reason: String = row.try_get("reason")?;
    let reason = WorkReason::from_str(&reason).map_err(|e| QueueError::Corrupt { id, reason: e })?;
    Ok(WorkItem {
        id,
        job_id: row.try_get("job_id")?,
        reason,
        run_at: row.try_get("run_at")?,
        attempts: row.try_get::<i32, _>("attempts")?.max(0) as u32,
    })
}

#[async_trait]
impl DelayedQueue for PostgresDelayedQueue {
    async fn schedule(&self, item: WorkItem) -> QueueResult<()> {
        sqlx::query(
            "INSERT INTO stagehand_work_items (id, job_id, reason, run_at, attempts) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(item.id)
        .bind(item.job_id)
        .bind(item.reason.to_string())
        .bind(item.run_at)
        .bind(item.attempts as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_due(&self, limit: usize, visibility: Duration) -> QueueResult<Vec<WorkItem>> {
        let now = Utc::now();
        let rows = sqlx::query(
            "UPDATE stagehand_work_items SET claimed_until = $2, attempts = attempts + 1 \
             WHERE id IN ( \
                 SELECT id FROM stagehand_work_items \
                 WHERE run_at <= $1 AND (claimed_until IS NULL OR claimed_until <= $1) \
                 ORDER BY run_at \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, job_id, reason, run_at, attempts",
        )
        .bind(now)
        .bind(offset_from(now, visibility))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut items = rows.iter().map(item_from_row).collect::<QueueResult<Vec<_>>>()?;
        items.sort_by_key(|item| item.run_at);
        Ok(items)
    }

    async fn ack(&self, id: Uuid) -> QueueResult<bool> {
        let result = sqlx::query("DELETE FROM stagehand_work_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn next_run_at(&self) -> QueueResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MIN(GREATEST(run_at, COALESCE(claimed_until, run_at))) AS next_run \
             FROM stagehand_work_items",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<Option<DateTime<Utc>>, _>("next_run")?)
    }

    async fn len(&self) -> QueueResult<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM stagehand_work_items")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get("total")?;
        Ok(total.max(0) as usize)
    }

    async fn pending(&self) -> QueueResult<Vec<WorkItem>> {
        let rows = sqlx::query(
            "SELECT id, job_id, reason, run_at, attempts FROM stagehand_work_items \
             WHERE claimed_until IS NULL OR claimed_until <= NOW() \
             ORDER BY run_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }
}
