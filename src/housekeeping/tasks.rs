//! Built-in periodic tasks.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::HousekeepingConfig;
use crate::error::Result;
use crate::models::{Job, JobFilter};
use crate::orchestration::{ErrorCategory, Orchestrator};
use crate::recovery::RecoveryScheduler;
use crate::state_machine::JobState;

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    /// One invocation; the returned value is the task's report
    async fn run(&self) -> Result<Value>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub readvanced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Re-dispatches or fails jobs that stopped moving
pub struct StuckJobSweep {
    orchestrator: Arc<Orchestrator>,
    config: HousekeepingConfig,
}

impl StuckJobSweep {
    pub fn new(orchestrator: Arc<Orchestrator>, config: HousekeepingConfig) -> Self {
        Self { orchestrator, config }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let threshold = chrono::Duration::minutes(self.config.stuck_threshold_minutes as i64);
        let max_age = chrono::Duration::hours(self.config.stuck_max_age_hours as i64);
        let filter = JobFilter::new()
            .states(JobState::non_terminal())
            .updated_before(now - threshold);
        let jobs = self.orchestrator.store().list_by_filter(&filter).await?;

        let mut report = SweepReport {
            examined: jobs.len(),
            ..SweepReport::default()
        };
        for job in &jobs {
            if job.revoked || job.has_pending_attempt(now) {
                report.skipped += 1;
                continue;
            }

            let result = if job.retry_count < self.config.stuck_max_retries && job.age(now) < max_age {
                self.orchestrator.readvance(job).await.map(|applied| (applied, true))
            } else {
                let message = format!(
                    "Job stuck in {} for over {} minutes after {} retries",
                    job.state, self.config.stuck_threshold_minutes, job.retry_count
                );
                self.orchestrator
                    .force_fail(job, &message, ErrorCategory::TemporaryError)
                    .await
                    .map(|applied| (applied, false))
            };

            match result {
                Ok((true, true)) => report.readvanced += 1,
                Ok((true, false)) => report.failed += 1,
                Ok((false, _)) => report.skipped += 1,
                Err(err) => {
                    error!(job_id = job.id, error = %err, "Stuck sweep failed for job");
                    report.errors += 1;
                }
            }
        }

        if report.readvanced + report.failed > 0 {
            warn!(
                readvanced = report.readvanced,
                failed = report.failed,
                "Stuck jobs handled"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl PeriodicTask for StuckJobSweep {
    fn name(&self) -> &str {
        "sweep-stuck-jobs"
    }

    async fn run(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.sweep().await?)?)
    }
}

/// Fails jobs that outlived the maximum job lifetime
pub struct TimeoutSweep {
    orchestrator: Arc<Orchestrator>,
    config: HousekeepingConfig,
}

impl TimeoutSweep {
    pub fn new(orchestrator: Arc<Orchestrator>, config: HousekeepingConfig) -> Self {
        Self { orchestrator, config }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let lifetime = chrono::Duration::hours(self.config.max_job_lifetime_hours as i64);
        let filter = JobFilter::new()
            .states(JobState::non_terminal())
            .created_before(now - lifetime);
        let jobs = self.orchestrator.store().list_by_filter(&filter).await?;

        let mut report = SweepReport {
            examined: jobs.len(),
            ..SweepReport::default()
        };
        let message = format!(
            "Job exceeded maximum lifetime of {} hours",
            self.config.max_job_lifetime_hours
        );
        for job in &jobs {
            match self
                .orchestrator
                .force_fail(job, &message, ErrorCategory::PermanentError)
                .await
            {
                Ok(true) => report.failed += 1,
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    error!(job_id = job.id, error = %err, "Timeout sweep failed for job");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl PeriodicTask for TimeoutSweep {
    fn name(&self) -> &str {
        "sweep-timeouts"
    }

    async fn run(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.sweep().await?)?)
    }
}

/// Daily health statistics
pub struct StatisticsTask {
    orchestrator: Arc<Orchestrator>,
}

impl StatisticsTask {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn collect(&self) -> Result<Value> {
        let now = Utc::now();
        let counts = self.orchestrator.store().count_by_state().await?;
        let count = |state: JobState| counts.get(&state).copied().unwrap_or(0);

        let total: u64 = counts.values().sum();
        let completed = count(JobState::Completed) + count(JobState::Returned);
        let failed = count(JobState::Failed);
        let finished = completed + failed;
        let success_rate = if finished == 0 {
            None
        } else {
            Some(completed as f64 / finished as f64)
        };

        let recent = self
            .orchestrator
            .store()
            .list_by_filter(&JobFilter::new().updated_after(now - chrono::Duration::hours(24)))
            .await?;
        let retry_distribution = distribution(&recent, |job| Some(job.retry_count.to_string()));
        let failure_categories = distribution(&recent, |job| {
            (job.state == JobState::Failed).then(|| {
                job.failure_category
                    .map(|c| c.to_string())
                    .or_else(|| job.error_category.map(|c| c.to_string()))
                    .unwrap_or_else(|| "unclassified".to_string())
            })
        });

        let engine = self.orchestrator.retry_engine();
        let error_statistics: BTreeMap<String, Value> = engine
            .known_kinds()
            .into_iter()
            .map(|kind| {
                let analysis = engine.analyze_errors(&kind);
                let value = serde_json::to_value(&analysis).unwrap_or(Value::Null);
                (kind, value)
            })
            .collect();

        let mut insights = Vec::new();
        if let Some(rate) = success_rate {
            if rate < 0.8 {
                insights.push(format!("Success rate is low at {:.1}%", rate * 100.0));
            }
        }
        let running: u64 = JobState::ALL
            .into_iter()
            .filter(JobState::is_running)
            .map(count)
            .sum();
        if total > 0 && running as f64 / total as f64 > 0.5 {
            insights.push("More than half of all jobs are currently running".to_string());
        }
        let retried = recent.iter().filter(|job| job.retry_count > 0).count();
        if !recent.is_empty() && retried as f64 / recent.len() as f64 > 0.3 {
            insights.push("Over 30% of recently active jobs needed retries".to_string());
        }

        let by_state: BTreeMap<String, u64> =
            counts.iter().map(|(state, n)| (state.to_string(), *n)).collect();
        info!(
            total,
            completed,
            failed,
            success_rate = success_rate.unwrap_or(1.0),
            "📊 DAILY_STATISTICS"
        );

        Ok(json!({
            "generated_at": now,
            "total_jobs": total,
            "by_state": by_state,
            "success_rate": success_rate,
            "recent_jobs": recent.len(),
            "retry_distribution": retry_distribution,
            "recent_failure_categories": failure_categories,
            "error_statistics": error_statistics,
            "insights": insights,
        }))
    }
}

fn distribution(jobs: &[Job], key: impl Fn(&Job) -> Option<String>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for k in jobs.iter().filter_map(key) {
        *counts.entry(k).or_insert(0) += 1;
    }
    counts
}

#[async_trait]
impl PeriodicTask for StatisticsTask {
    fn name(&self) -> &str {
        "generate-statistics"
    }

    async fn run(&self) -> Result<Value> {
        self.collect().await
    }
}

/// Purges finished jobs past their retention
pub struct CleanupTask {
    orchestrator: Arc<Orchestrator>,
    config: HousekeepingConfig,
}

impl CleanupTask {
    pub fn new(orchestrator: Arc<Orchestrator>, config: HousekeepingConfig) -> Self {
        Self { orchestrator, config }
    }
}

#[async_trait]
impl PeriodicTask for CleanupTask {
    fn name(&self) -> &str {
        "cleanup-jobs"
    }

    async fn run(&self) -> Result<Value> {
        let now = Utc::now();
        let store = self.orchestrator.store();

        let finished = JobFilter::new()
            .states([JobState::Completed, JobState::Returned])
            .updated_before(now - chrono::Duration::days(self.config.completed_retention_days as i64));
        let purged_finished = store.purge(&finished).await?;

        let failed = JobFilter::new()
            .states([JobState::Failed])
            .updated_before(now - chrono::Duration::days(self.config.failed_retention_days as i64));
        let purged_failed = store.purge(&failed).await?;

        info!(purged_finished, purged_failed, "🧹 CLEANUP: Purged old jobs");
        Ok(json!({
            "purged_finished": purged_finished,
            "purged_failed": purged_failed,
        }))
    }
}

/// Periodic entry point of the recovery scheduler
pub struct RecoveryScanTask {
    scheduler: Arc<RecoveryScheduler>,
}

impl RecoveryScanTask {
    pub fn new(scheduler: Arc<RecoveryScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl PeriodicTask for RecoveryScanTask {
    fn name(&self) -> &str {
        "scan-failed-jobs"
    }

    async fn run(&self) -> Result<Value> {
        let report = self.scheduler.run_once().await?;
        Ok(serde_json::to_value(report)?)
    }
}
