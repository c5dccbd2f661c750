//! # Housekeeping
//!
//! Cron-like dispatcher for the engine's periodic maintenance: the stuck-job and timeout
//! sweeps, the recovery scan, daily statistics and retention cleanup.
//!
//! Due tasks are dispatched in descending priority. Tasks routed to the same queue run
//! one after another; different queues run concurrently. A failed invocation is re-run
//! according to its [`TaskRetryPolicy`] before the failure is reported. Retry backoff
//! is cut short by cancellation, and a cancelled lane dispatches nothing further.

pub mod schedule;
pub mod tasks;

pub use schedule::{Schedule, TaskRetryPolicy, TaskSpec};
pub use tasks::{
    CleanupTask, PeriodicTask, RecoveryScanTask, StatisticsTask, StuckJobSweep, SweepReport,
    TimeoutSweep,
};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HousekeepingConfig;
use crate::error::StagehandError;
use crate::constants::queues;
use crate::logging::log_housekeeping_run;
use crate::orchestration::Orchestrator;
use crate::recovery::RecoveryScheduler;

/// Result of one task invocation, retries included
#[derive(Debug, Clone, Serialize)]
pub struct TaskRunReport {
    pub name: String,
    pub queue: String,
    pub priority: u8,
    pub success: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

struct RegisteredTask {
    spec: TaskSpec,
    task: Arc<dyn PeriodicTask>,
    next_run: DateTime<Utc>,
}

pub struct HousekeepingScheduler {
    tasks: Mutex<Vec<RegisteredTask>>,
    tick_interval: Duration,
}

impl fmt::Debug for HousekeepingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HousekeepingScheduler")
            .field("tasks", &self.task_names())
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

impl HousekeepingScheduler {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            tick_interval: tick_interval.max(Duration::from_millis(10)),
        }
    }

    /// Scheduler with the standard maintenance tasks registered
    pub fn with_default_tasks(
        orchestrator: Arc<Orchestrator>,
        recovery: Arc<RecoveryScheduler>,
        config: &HousekeepingConfig,
    ) -> Self {
        let scheduler = Self::new(Duration::from_secs(config.tick_interval_secs));

        scheduler.register(
            TaskSpec::new(
                "sweep-stuck-jobs",
                queues::HIGH_PRIORITY,
                Schedule::every_minutes(15),
                9,
            )
            .with_retry(TaskRetryPolicy::new(3, Duration::from_secs(60))),
            Arc::new(StuckJobSweep::new(orchestrator.clone(), config.clone())),
        );
        scheduler.register(
            TaskSpec::new(
                "sweep-timeouts",
                queues::TRACKING,
                Schedule::Minutes(vec![30, 45]),
                6,
            ),
            Arc::new(TimeoutSweep::new(orchestrator.clone(), config.clone())),
        );
        scheduler.register(
            TaskSpec::new(
                "scan-failed-jobs",
                queues::RECOVERY,
                Schedule::Every(Duration::from_secs(recovery.config().scan_interval_secs)),
                7,
            )
            .with_retry(TaskRetryPolicy::new(2, Duration::from_secs(300))),
            Arc::new(RecoveryScanTask::new(recovery)),
        );
        scheduler.register(
            TaskSpec::new(
                "generate-statistics",
                queues::REPORTING,
                Schedule::Daily { hour: 2, minute: 0 },
                3,
            ),
            Arc::new(StatisticsTask::new(orchestrator.clone())),
        );
        scheduler.register(
            TaskSpec::new(
                "cleanup-jobs",
                queues::MAINTENANCE,
                Schedule::Daily { hour: 4, minute: 0 },
                2,
            ),
            Arc::new(CleanupTask::new(orchestrator, config.clone())),
        );

        scheduler
    }

    /// Register a task; its first run is the schedule's next fire time from now.
    /// A task registered under an existing name replaces it.
    pub fn register(&self, spec: TaskSpec, task: Arc<dyn PeriodicTask>) {
        let next_run = spec.schedule.next_after(Utc::now());
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| t.spec.name != spec.name);
        debug!(task = %spec.name, next_run = %next_run, "Registered periodic task");
        tasks.push(RegisteredTask { spec, task, next_run });
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.lock().iter().map(|t| t.spec.name.clone()).collect()
    }

    pub fn specs(&self) -> Vec<TaskSpec> {
        self.tasks.lock().iter().map(|t| t.spec.clone()).collect()
    }

    pub fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        self.tasks
            .lock()
            .iter()
            .find(|t| t.spec.name == name)
            .map(|t| t.next_run)
    }

    /// Run every task whose fire time is at or before `now`; reports come back in
    /// dispatch order
    pub async fn run_due(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> Vec<TaskRunReport> {
        let mut due: Vec<(TaskSpec, Arc<dyn PeriodicTask>)> = {
            let mut tasks = self.tasks.lock();
            tasks
                .iter_mut()
                .filter(|t| t.next_run <= now)
                .map(|t| {
                    t.next_run = t.spec.schedule.next_after(now);
                    (t.spec.clone(), t.task.clone())
                })
                .collect()
        };
        if due.is_empty() {
            return Vec::new();
        }
        due.sort_by(|a, b| b.0.priority.cmp(&a.0.priority).then_with(|| a.0.name.cmp(&b.0.name)));

        // Lanes keep the priority order of their first task
        let mut lanes: Vec<(String, Vec<(usize, TaskSpec, Arc<dyn PeriodicTask>)>)> = Vec::new();
        for (index, (spec, task)) in due.into_iter().enumerate() {
            match lanes.iter_mut().find(|(queue, _)| *queue == spec.target_queue) {
                Some((_, lane)) => lane.push((index, spec, task)),
                None => lanes.push((spec.target_queue.clone(), vec![(index, spec, task)])),
            }
        }

        let lane_runs = lanes.into_iter().map(|(_, lane)| async move {
            let mut reports = Vec::with_capacity(lane.len());
            for (index, spec, task) in lane {
                if cancel.is_cancelled() {
                    debug!(task = %spec.name, "Skipping periodic task, housekeeping is stopping");
                    break;
                }
                reports.push((index, execute(&spec, task.as_ref(), cancel).await));
            }
            reports
        });

        let mut reports: Vec<(usize, TaskRunReport)> =
            join_all(lane_runs).await.into_iter().flatten().collect();
        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    /// Run a task immediately, outside its schedule
    pub async fn trigger(&self, name: &str) -> Option<TaskRunReport> {
        let (spec, task) = {
            let tasks = self.tasks.lock();
            let registered = tasks.iter().find(|t| t.spec.name == name)?;
            (registered.spec.clone(), registered.task.clone())
        };
        Some(execute(&spec, task.as_ref(), &CancellationToken::new()).await)
    }

    /// Tick until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            tasks = self.tasks.lock().len(),
            tick_ms = self.tick_interval.as_millis() as u64,
            "🕰️ HOUSEKEEPING: Started"
        );
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reports = self.run_due(Utc::now(), &cancel).await;
                    let failed = reports.iter().filter(|r| !r.success).count();
                    if failed > 0 {
                        warn!(dispatched = reports.len(), failed, "Housekeeping tick had failures");
                    }
                }
            }
        }
        info!("🕰️ HOUSEKEEPING: Stopped");
    }
}

async fn execute(spec: &TaskSpec, task: &dyn PeriodicTask, cancel: &CancellationToken) -> TaskRunReport {
    let started_at = Utc::now();
    let start = Instant::now();
    let mut attempts = 0;

    let result = loop {
        attempts += 1;
        match task.run().await {
            Ok(output) => break Ok(output),
            Err(err) => match spec.retry {
                Some(policy) if attempts <= policy.max_retries => {
                    let delay = policy.delay(attempts - 1);
                    warn!(
                        task = %spec.name,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Periodic task failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            break Err(StagehandError::Internal(format!(
                                "cancelled during retry backoff after: {err}"
                            )));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                _ => break Err(err),
            },
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    log_housekeeping_run(&spec.name, &spec.target_queue, result.is_ok(), duration_ms);

    let (output, error) = match result {
        Ok(output) => (Some(output), None),
        Err(err) => (None, Some(err.to_string())),
    };
    TaskRunReport {
        name: spec.name.clone(),
        queue: spec.target_queue.clone(),
        priority: spec.priority,
        success: error.is_none(),
        attempts,
        duration_ms,
        output,
        error,
        started_at,
    }
}
