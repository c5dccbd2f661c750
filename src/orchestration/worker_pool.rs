//! Worker pool draining the delayed queue.
//!
//! Claims due work items, runs `advance` for each on its own task (bounded by a
//! semaphore) and acknowledges the item once `advance` returns `Ok`. Items whose
//! advance failed with an infrastructure error are left unacknowledged and reappear
//! after the claim visibility timeout.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::orchestrator::Orchestrator;
use crate::error::Result;
use crate::queue::{DelayedQueue, WorkItem};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolRunReport {
    pub claimed: usize,
    pub acknowledged: usize,
    pub failed: usize,
}

pub struct WorkerPool {
    orchestrator: Arc<Orchestrator>,
    queue: Arc<dyn DelayedQueue>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    poll_interval: Duration,
    visibility: Duration,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.concurrency)
            .field("poll_interval", &self.poll_interval)
            .field("visibility", &self.visibility)
            .finish()
    }
}

impl WorkerPool {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let config = orchestrator.config().clone();
        let concurrency = config.worker_concurrency.max(1);
        Self {
            queue: Arc::clone(orchestrator.queue()),
            orchestrator,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            poll_interval: config.poll_interval(),
            visibility: config.claim_visibility(),
        }
    }

    /// Claim and process whatever is due right now, waiting for every spawned advance
    pub async fn run_once(&self) -> Result<PoolRunReport> {
        let items = self.queue.claim_due(self.concurrency, self.visibility).await?;
        let mut report = PoolRunReport {
            claimed: items.len(),
            ..PoolRunReport::default()
        };

        let mut tasks = JoinSet::new();
        for item in items {
            self.spawn_item(&mut tasks, item).await;
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => report.acknowledged += 1,
                Ok(false) => report.failed += 1,
                Err(join_error) => {
                    error!(error = %join_error, "Worker task panicked");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Run until `cancel` fires. In-flight advances are allowed to finish.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(concurrency = self.concurrency, "🚀 WORKER_POOL: Started");
        let mut tasks = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            while tasks.try_join_next().is_some() {}

            let available = self.permits.available_permits();
            let claimed = if available == 0 {
                Vec::new()
            } else {
                match self.queue.claim_due(available, self.visibility).await {
                    Ok(items) => items,
                    Err(err) => {
                        error!(error = %err, "Failed to claim work items");
                        Vec::new()
                    }
                }
            };

            if claimed.is_empty() {
                let wait = self.idle_wait().await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                continue;
            }

            for item in claimed {
                self.spawn_item(&mut tasks, item).await;
            }
        }

        info!(in_flight = tasks.len(), "🛑 WORKER_POOL: Draining");
        while tasks.join_next().await.is_some() {}
        info!("🛑 WORKER_POOL: Stopped");
    }

    /// Sleep until the next item is due, but never longer than the poll interval
    async fn idle_wait(&self) -> Duration {
        match self.queue.next_run_at().await {
            Ok(Some(at)) => (at - chrono::Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.poll_interval)
                .max(Duration::from_millis(10)),
            Ok(None) => self.poll_interval,
            Err(err) => {
                warn!(error = %err, "Failed to read next run time");
                self.poll_interval
            }
        }
    }

    async fn spawn_item(&self, tasks: &mut JoinSet<bool>, item: WorkItem) {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(job_id = item.job_id, "Worker semaphore closed");
                return;
            }
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        let queue = Arc::clone(&self.queue);

        tasks.spawn(async move {
            let _permit = permit;
            match orchestrator.advance(item.job_id).await {
                Ok(outcome) => {
                    debug!(
                        job_id = item.job_id,
                        reason = %item.reason,
                        outcome = ?outcome,
                        "Advance finished"
                    );
                    if let Err(err) = queue.ack(item.id).await {
                        warn!(job_id = item.job_id, error = %err, "Failed to acknowledge work item");
                    }
                    true
                }
                Err(crate::error::StagehandError::NotFound(job_id)) => {
                    warn!(job_id, "Work item for unknown job dropped");
                    let _ = queue.ack(item.id).await;
                    false
                }
                Err(err) => {
                    error!(
                        job_id = item.job_id,
                        reason = %item.reason,
                        attempts = item.attempts,
                        error = %err,
                        "Advance failed, item will be redelivered"
                    );
                    false
                }
            }
        });
    }
}
