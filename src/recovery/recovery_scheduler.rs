//! # Recovery Scheduler
//!
//! Periodic sweep over terminal-failed jobs.
//!
//! Each run selects failed jobs that changed inside the scan window but not within the
//! quiet interval, still have recovery attempts left and were not already escalated.
//! Every selected job is analyzed and handled according to its failure category:
//!
//! | Category          | Handling                                                      |
//! |-------------------|---------------------------------------------------------------|
//! | Recoverable*      | re-inject at the resume stage after an exponential delay      |
//! | Unrecoverable*    | mark notified, then alert the operator channel or the owner   |
//! | Unknown           | flag for manual review with the analysis as notes             |
//!
//! Re-injection goes through [`Orchestrator::recover`], the same compare-and-set path
//! live processing uses, so a job that moved since the scan is skipped rather than
//! clobbered.

use chrono::{DateTime, NaiveDate, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::failure_analyzer::{FailureAnalysis, FailureAnalyzer, FailureCategory, RecommendedAction};
use crate::config::RecoveryConfig;
use crate::constants::{events, limits};
use crate::error::{Result, StagehandError};
use crate::logging::log_recovery_decision;
use crate::metrics;
use crate::models::{Job, JobFilter, JobPatch};
use crate::notifications::{NoticeSeverity, NotificationEvent, OperatorNotice};
use crate::orchestration::Orchestrator;
use crate::queue::WorkReason;
use crate::state_machine::{resume_stage, JobState, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAudience {
    Operator,
    Owner,
}

/// What happened to one job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Recovered { stage: Stage, delay: Duration },
    Notified { audience: NotificationAudience },
    ManualReview,
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecoveryResult {
    pub job_id: i64,
    pub category: Option<FailureCategory>,
    pub action: Option<RecommendedAction>,
    pub outcome: Option<RecoveryOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub recovered: usize,
    pub notified: usize,
    pub manual_review: usize,
    pub skipped: usize,
    pub errors: usize,
    pub results: Vec<JobRecoveryResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RecoveryReport {
    fn tally(&mut self, outcome: &RecoveryOutcome) {
        match outcome {
            RecoveryOutcome::Recovered { .. } => self.recovered += 1,
            RecoveryOutcome::Notified { .. } => self.notified += 1,
            RecoveryOutcome::ManualReview => self.manual_review += 1,
            RecoveryOutcome::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Trend report over recent failures
#[derive(Debug, Clone, Serialize)]
pub struct FailurePatternReport {
    pub period_days: u32,
    pub total_failures: usize,
    pub category_distribution: BTreeMap<String, usize>,
    /// Most frequent message prefixes, most common first
    pub top_error_patterns: Vec<(String, usize)>,
    pub job_kind_failures: BTreeMap<String, usize>,
    pub daily_failures: BTreeMap<NaiveDate, usize>,
    pub insights: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

const PATTERN_PREFIX_CHARS: usize = 100;
const TOP_PATTERNS: usize = 10;

pub struct RecoveryScheduler {
    orchestrator: Arc<Orchestrator>,
    analyzer: FailureAnalyzer,
    config: RecoveryConfig,
}

impl std::fmt::Debug for RecoveryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryScheduler")
            .field("analyzer", &self.analyzer)
            .field("config", &self.config)
            .finish()
    }
}

impl RecoveryScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, config: RecoveryConfig) -> Self {
        let analyzer = FailureAnalyzer::new(Arc::clone(orchestrator.retry_engine().classifier()));
        Self {
            orchestrator,
            analyzer,
            config,
        }
    }

    pub fn with_analyzer(mut self, analyzer: FailureAnalyzer) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn analyzer(&self) -> &FailureAnalyzer {
        &self.analyzer
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Delay before a recovered job runs again: category base × 2^attempts, capped
    pub fn recovery_delay(&self, category: FailureCategory, recovery_attempts: u32) -> Duration {
        let base = match category {
            FailureCategory::RecoverableNetwork => self.config.network_base_delay_secs,
            FailureCategory::RecoverableSystem => self.config.system_base_delay_secs,
            FailureCategory::RecoverableTemporary => self.config.temporary_base_delay_secs,
            _ => 60,
        };
        let exponent = recovery_attempts.min(limits::RECOVERY_BACKOFF_EXPONENT_CAP);
        let delay = base.saturating_mul(1u64 << exponent);
        Duration::from_secs(delay.min(self.config.max_delay_secs))
    }

    fn scan_filter(&self, now: DateTime<Utc>) -> JobFilter {
        JobFilter::new()
            .states([JobState::Failed])
            .updated_after(now - self.config.scan_window())
            .updated_before(now - self.config.quiet_interval())
            .recovery_attempts_below(self.config.max_recovery_attempts)
            .exclude_flagged()
            .limit(self.config.scan_limit)
    }

    /// One full scan-and-handle pass. A failure on one job is counted and the pass
    /// continues; only a failed scan query aborts the run.
    pub async fn run_once(&self) -> Result<RecoveryReport> {
        let started_at = Utc::now();
        let jobs = self
            .orchestrator
            .store()
            .list_by_filter(&self.scan_filter(started_at))
            .await?;

        let mut report = RecoveryReport {
            scanned: jobs.len(),
            started_at: Some(started_at),
            ..RecoveryReport::default()
        };
        info!(scanned = jobs.len(), "🩺 RECOVERY_SCAN: Started");

        for job in &jobs {
            let analysis = self.analyzer.analyze(job);
            match self.handle(job, &analysis).await {
                Ok(outcome) => {
                    report.tally(&outcome);
                    report.results.push(JobRecoveryResult {
                        job_id: job.id,
                        category: Some(analysis.category),
                        action: Some(analysis.action),
                        outcome: Some(outcome),
                        error: None,
                    });
                }
                Err(err) => {
                    error!(job_id = job.id, error = %err, "Recovery handling failed");
                    report.errors += 1;
                    report.results.push(JobRecoveryResult {
                        job_id: job.id,
                        category: Some(analysis.category),
                        action: Some(analysis.action),
                        outcome: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        report.finished_at = Some(Utc::now());
        info!(
            scanned = report.scanned,
            recovered = report.recovered,
            notified = report.notified,
            manual_review = report.manual_review,
            skipped = report.skipped,
            errors = report.errors,
            "🩺 RECOVERY_SCAN: Completed"
        );
        Ok(report)
    }

    /// Manual recovery entry point. With `force` the attempt cap and the analysis are
    /// bypassed and the job is re-injected immediately at its resume stage.
    pub async fn recover_job(&self, job_id: i64, force: bool) -> Result<RecoveryOutcome> {
        let job = self
            .orchestrator
            .store()
            .get_by_id(job_id)
            .await?
            .ok_or(StagehandError::NotFound(job_id))?;

        if job.state != JobState::Failed {
            return Ok(skipped(format!("job is {}, not failed", job.state)));
        }
        if job.revoked {
            return Ok(skipped("job was revoked"));
        }

        if force {
            let stage = resume_stage(&job.payload_refs);
            let applied = self
                .orchestrator
                .recover(&job, stage, Duration::ZERO, None, WorkReason::ManualRecovery)
                .await?;
            if !applied {
                return Ok(skipped("job changed during recovery"));
            }
            info!(job_id, stage = %stage, "🩺 MANUAL_RECOVERY: Forced");
            metrics::recovery_recovered_total().add(1, &[KeyValue::new("mode", "forced")]);
            return Ok(RecoveryOutcome::Recovered {
                stage,
                delay: Duration::ZERO,
            });
        }

        if job.recovery_attempts >= self.config.max_recovery_attempts {
            return Ok(skipped(format!(
                "recovery attempts exhausted ({}/{})",
                job.recovery_attempts, self.config.max_recovery_attempts
            )));
        }

        let analysis = self.analyzer.analyze(&job);
        self.handle(&job, &analysis).await
    }

    async fn handle(&self, job: &Job, analysis: &FailureAnalysis) -> Result<RecoveryOutcome> {
        log_recovery_decision(
            job.id,
            &analysis.category.to_string(),
            &analysis.action.to_string(),
            &analysis.confidence.to_string(),
            job.recovery_attempts,
        );

        match analysis.category {
            category if category.is_recoverable() => self.reinject(job, category).await,
            category if category.is_unrecoverable() => self.escalate(job, analysis).await,
            _ => self.flag_for_review(job, analysis).await,
        }
    }

    async fn reinject(&self, job: &Job, category: FailureCategory) -> Result<RecoveryOutcome> {
        let stage = resume_stage(&job.payload_refs);
        let delay = self.recovery_delay(category, job.recovery_attempts);

        let applied = self
            .orchestrator
            .recover(job, stage, delay, Some(category), WorkReason::Recovery)
            .await?;
        if !applied {
            return Ok(skipped("job changed during recovery"));
        }

        metrics::recovery_recovered_total()
            .add(1, &[KeyValue::new("category", category.to_string())]);
        info!(
            job_id = job.id,
            category = %category,
            stage = %stage,
            delay_secs = delay.as_secs(),
            strategy = category.recovery_strategy().unwrap_or("manual_retry"),
            recovery_attempt = job.recovery_attempts + 1,
            "🩺 RECOVERY_SCHEDULED"
        );
        Ok(RecoveryOutcome::Recovered { stage, delay })
    }

    async fn escalate(&self, job: &Job, analysis: &FailureAnalysis) -> Result<RecoveryOutcome> {
        // mark first: a notification must not repeat on the next scan
        let patch = JobPatch::new()
            .failure_notified()
            .failure_category(analysis.category);
        if !self.orchestrator.annotate(job, patch).await? {
            return Ok(skipped("job changed before escalation"));
        }

        let (title, description) = escalation_text(analysis.category);
        metrics::recovery_escalated_total()
            .add(1, &[KeyValue::new("category", analysis.category.to_string())]);

        let audience = if analysis.action.targets_admin() {
            let notice = OperatorNotice::new(NoticeSeverity::Critical, title, description)
                .for_job(job.id)
                .with_details(serde_json::json!({
                    "failure_category": analysis.category,
                    "error_message": job.error_message,
                    "analysis": analysis,
                }));
            let receivers = self.orchestrator.hub().broadcast_operator(notice);
            warn!(
                job_id = job.id,
                category = %analysis.category,
                receivers,
                "🚨 ADMIN_ALERT: {title}"
            );
            NotificationAudience::Operator
        } else {
            let event = NotificationEvent::for_job(job, events::JOB_ATTENTION_REQUIRED, description)
                .with_payload(serde_json::json!({
                    "title": title,
                    "failureCategory": analysis.category,
                }));
            let delivered = self.orchestrator.hub().publish(&event);
            info!(job_id = job.id, owner = %job.owner, delivered, "📣 OWNER_NOTIFIED: {title}");
            NotificationAudience::Owner
        };

        Ok(RecoveryOutcome::Notified { audience })
    }

    async fn flag_for_review(&self, job: &Job, analysis: &FailureAnalysis) -> Result<RecoveryOutcome> {
        let notes = serde_json::json!({
            "marked_at": Utc::now(),
            "reason": "failure_analysis_uncertain",
            "analysis": analysis,
        });
        let patch = JobPatch::new()
            .manual_review(notes.to_string())
            .failure_category(FailureCategory::Unknown);
        if !self.orchestrator.annotate(job, patch).await? {
            return Ok(skipped("job changed before review flag"));
        }

        metrics::recovery_escalated_total()
            .add(1, &[KeyValue::new("category", FailureCategory::Unknown.to_string())]);
        info!(job_id = job.id, "🔎 MANUAL_REVIEW: Flagged");
        Ok(RecoveryOutcome::ManualReview)
    }

    /// Distribution of failures over the last `days` days
    pub async fn analyze_failure_patterns(&self, days: u32) -> Result<FailurePatternReport> {
        let now = Utc::now();
        let filter = JobFilter::new()
            .states([JobState::Failed])
            .updated_after(now - chrono::Duration::days(i64::from(days)));
        let jobs = self.orchestrator.store().list_by_filter(&filter).await?;

        let mut category_distribution = BTreeMap::new();
        let mut patterns: BTreeMap<String, usize> = BTreeMap::new();
        let mut job_kind_failures = BTreeMap::new();
        let mut daily_failures = BTreeMap::new();

        for job in &jobs {
            let analysis = self.analyzer.analyze(job);
            *category_distribution
                .entry(analysis.category.to_string())
                .or_insert(0) += 1;
            if let Some(message) = &job.error_message {
                let key: String = message.chars().take(PATTERN_PREFIX_CHARS).collect();
                *patterns.entry(key).or_insert(0) += 1;
            }
            *job_kind_failures.entry(job.job_kind.clone()).or_insert(0) += 1;
            *daily_failures.entry(job.updated_at.date_naive()).or_insert(0) += 1;
        }

        let mut top_error_patterns: Vec<(String, usize)> = patterns.into_iter().collect();
        top_error_patterns.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_error_patterns.truncate(TOP_PATTERNS);

        let insights = failure_insights(&category_distribution, &job_kind_failures);
        info!(days, total_failures = jobs.len(), "📊 FAILURE_PATTERNS: Analyzed");

        Ok(FailurePatternReport {
            period_days: days,
            total_failures: jobs.len(),
            category_distribution,
            top_error_patterns,
            job_kind_failures,
            daily_failures,
            insights,
            generated_at: now,
        })
    }
}

fn skipped(reason: impl Into<String>) -> RecoveryOutcome {
    RecoveryOutcome::Skipped {
        reason: reason.into(),
    }
}

fn escalation_text(category: FailureCategory) -> (&'static str, &'static str) {
    match category {
        FailureCategory::UnrecoverableData => (
            "Job failed on a data error",
            "The input could not be processed because of its format or content; check the submitted data",
        ),
        FailureCategory::UnrecoverableConfig => (
            "Job failed on a configuration error",
            "The job could not run because of a system configuration problem; check credentials and settings",
        ),
        FailureCategory::UnrecoverableBusiness => (
            "Job rejected by a business rule",
            "The job conflicts with a business rule and cannot complete; review the request",
        ),
        _ => (
            "Job failure needs attention",
            "The job failed and needs manual handling",
        ),
    }
}

pub fn failure_insights(
    category_distribution: &BTreeMap<String, usize>,
    job_kind_failures: &BTreeMap<String, usize>,
) -> Vec<String> {
    let total: usize = category_distribution.values().sum();
    if total == 0 {
        return vec!["No failures recorded in the period".to_string()];
    }
    let share = |count: usize| count as f64 / total as f64;

    let mut insights = Vec::new();
    if let Some((category, count)) = category_distribution.iter().max_by_key(|(_, c)| **c) {
        if share(*count) > 0.4 {
            insights.push(format!(
                "Dominant failure category is {category} ({:.1}%)",
                share(*count) * 100.0
            ));
        }
    }

    let recoverable: usize = category_distribution
        .iter()
        .filter(|(category, _)| category.starts_with("recoverable"))
        .map(|(_, count)| *count)
        .sum();
    if share(recoverable) > 0.6 {
        insights.push(format!(
            "{:.1}% of failures are automatically recoverable",
            share(recoverable) * 100.0
        ));
    }

    if let Some((kind, count)) = job_kind_failures.iter().max_by_key(|(_, c)| **c) {
        insights.push(format!("Most failing job kind is {kind} ({count} failures)"));
    }

    let count_of = |name: &str| category_distribution.get(name).copied().unwrap_or(0);
    if share(count_of("recoverable_network")) > 0.3 {
        insights.push("Check network stability and upstream API availability".to_string());
    }
    if share(count_of("unrecoverable_data")) > 0.2 {
        insights.push("Tighten input validation at submission".to_string());
    }

    insights
}
