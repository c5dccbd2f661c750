//! PostgreSQL-backed job store.
//!
//! Schema lives in `migrations/0001_stagehand_jobs.sql`. The compare-and-set runs as a
//! single transaction holding the row lock (`SELECT ... FOR UPDATE`), so the state and
//! version check and the write cannot interleave with another worker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use std::str::FromStr;

use super::{CasOutcome, JobStore, StoreError, StoreResult};
use crate::models::{Job, JobFilter, JobPatch, NewJob, PayloadRefs};
use crate::orchestration::ErrorCategory;
use crate::recovery::FailureCategory;
use crate::state_machine::JobState;

const JOB_COLUMNS: &str = "id, correlation_id, owner, job_kind, input_ref, state, version, \
     retry_count, recovery_attempts, error_message, error_category, failure_category, \
     payload_refs, revoked, failure_notified, manual_review, review_notes, next_attempt_at, \
     created_at, started_at, updated_at, completed_at";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_column<T: FromStr>(column: &str, value: String) -> StoreResult<T> {
    T::from_str(&value).map_err(|_| StoreError::Corrupt {
        column: column.to_string(),
        value,
    })
}

fn parse_optional<T: FromStr>(column: &str, value: Option<String>) -> StoreResult<Option<T>> {
    value.map(|v| parse_column(column, v)).transpose()
}

fn job_from_row(row: &PgRow) -> StoreResult<Job> {
    let payload_refs: Json<PayloadRefs> = row.try_get("payload_refs")?;
    Ok(Job {
        id: row.try_get("id")?,
        correlation_id: row.try_get("correlation_id")?,
        owner: row.try_get("owner")?,
        job_kind: row.try_get("job_kind")?,
        input_ref: row.try_get("input_ref")?,
        state: parse_column::<JobState>("state", row.try_get("state")?)?,
        version: row.try_get("version")?,
        retry_count: row.try_get::<i32, _>("retry_count")?.max(0) as u32,
        recovery_attempts: row.try_get::<i32, _>("recovery_attempts")?.max(0) as u32,
        error_message: row.try_get("error_message")?,
        error_category: parse_optional::<ErrorCategory>(
            "error_category",
            row.try_get("error_category")?,
        )?,
        failure_category: parse_optional::<FailureCategory>(
            "failure_category",
            row.try_get("failure_category")?,
        )?,
        payload_refs: payload_refs.0,
        revoked: row.try_get("revoked")?,
        failure_notified: row.try_get("failure_notified")?,
        manual_review: row.try_get("manual_review")?,
        review_notes: row.try_get("review_notes")?,
        next_attempt_at: row.try_get::<Option<DateTime<Utc>>, _>("next_attempt_at")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &JobFilter) {
    if !filter.states.is_empty() {
        let states: Vec<String> = filter.states.iter().map(ToString::to_string).collect();
        qb.push(" AND state = ANY(").push_bind(states).push(")");
    }
    if let Some(owner) = &filter.owner {
        qb.push(" AND owner = ").push_bind(owner.clone());
    }
    if let Some(at) = filter.updated_before {
        qb.push(" AND updated_at < ").push_bind(at);
    }
    if let Some(at) = filter.updated_after {
        qb.push(" AND updated_at > ").push_bind(at);
    }
    if let Some(at) = filter.created_before {
        qb.push(" AND created_at < ").push_bind(at);
    }
    if let Some(cap) = filter.recovery_attempts_below {
        qb.push(" AND recovery_attempts < ").push_bind(cap as i32);
    }
    if filter.exclude_flagged {
        qb.push(" AND NOT (revoked OR failure_notified OR manual_review)");
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, new_job: NewJob) -> StoreResult<Job> {
        let template = Job::from_new(0, new_job, Utc::now());
        let sql = format!(
            "INSERT INTO stagehand_jobs (correlation_id, owner, job_kind, input_ref, state, version, \
             retry_count, recovery_attempts, payload_refs, revoked, failure_notified, manual_review, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 0, 0, 0, $6, FALSE, FALSE, FALSE, $7, $7) \
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(&template.correlation_id)
            .bind(&template.owner)
            .bind(&template.job_kind)
            .bind(&template.input_ref)
            .bind(template.state.to_string())
            .bind(Json(&template.payload_refs))
            .bind(template.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let duplicate =
                    matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation());
                if duplicate {
                    StoreError::DuplicateCorrelationId(template.correlation_id.clone())
                } else {
                    StoreError::from(e)
                }
            })?;

        job_from_row(&row)
    }

    async fn get_by_id(&self, id: i64) -> StoreResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM stagehand_jobs WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> StoreResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM stagehand_jobs WHERE correlation_id = $1");
        let row = sqlx::query(&sql)
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn compare_and_set_state(
        &self,
        id: i64,
        expected_state: JobState,
        expected_version: i64,
        new_state: JobState,
        patch: JobPatch,
    ) -> StoreResult<CasOutcome> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {JOB_COLUMNS} FROM stagehand_jobs WHERE id = $1 FOR UPDATE");
        let Some(row) = sqlx::query(&select).bind(id).fetch_optional(&mut *tx).await? else {
            tx.rollback().await?;
            return Ok(CasOutcome::Conflict { current: None });
        };
        let mut job = job_from_row(&row)?;

        if job.state != expected_state || job.version != expected_version {
            tx.rollback().await?;
            return Ok(CasOutcome::Conflict { current: Some(job) });
        }

        patch.apply(&mut job, new_state, Utc::now());

        let update = format!(
            "UPDATE stagehand_jobs SET state = $2, version = $3, retry_count = $4, \
             recovery_attempts = $5, error_message = $6, error_category = $7, \
             failure_category = $8, payload_refs = $9, revoked = $10, failure_notified = $11, \
             manual_review = $12, review_notes = $13, next_attempt_at = $14, started_at = $15, \
             updated_at = $16, completed_at = $17 \
             WHERE id = $1 RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&update)
            .bind(job.id)
            .bind(job.state.to_string())
            .bind(job.version)
            .bind(job.retry_count as i32)
            .bind(job.recovery_attempts as i32)
            .bind(&job.error_message)
            .bind(job.error_category.map(|c| c.to_string()))
            .bind(job.failure_category.map(|c| c.to_string()))
            .bind(Json(&job.payload_refs))
            .bind(job.revoked)
            .bind(job.failure_notified)
            .bind(job.manual_review)
            .bind(&job.review_notes)
            .bind(job.next_attempt_at)
            .bind(job.started_at)
            .bind(job.updated_at)
            .bind(job.completed_at)
            .fetch_one(&mut *tx)
            .await?;
        let updated = job_from_row(&row)?;

        tx.commit().await?;
        Ok(CasOutcome::Applied(updated))
    }

    async fn list_by_filter(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {JOB_COLUMNS} FROM stagehand_jobs WHERE TRUE"
        ));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY updated_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn count_by_state(&self) -> StoreResult<HashMap<JobState, u64>> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS total FROM stagehand_jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let state = parse_column::<JobState>("state", row.try_get("state")?)?;
            let total: i64 = row.try_get("total")?;
            counts.insert(state, total.max(0) as u64);
        }
        Ok(counts)
    }

    async fn purge(&self, filter: &JobFilter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("DELETE FROM stagehand_jobs WHERE TRUE");
        push_filter(&mut qb, filter);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
