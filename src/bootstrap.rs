//! # System Bootstrap
//!
//! Wires the store, queue, notification hub, orchestrator, recovery scheduler and
//! housekeeping into one [`StagehandSystem`] and runs their background loops.
//!
//! ```rust,no_run
//! use stagehand::bootstrap::StagehandSystem;
//! use stagehand::config::StagehandConfig;
//! use stagehand::orchestration::StageExecutors;
//!
//! # async fn example(executors: StageExecutors) -> stagehand::Result<()> {
//! let system = StagehandSystem::in_memory(&StagehandConfig::default(), executors)?;
//! let handle = system.start();
//! // ... submit jobs through system.orchestrator() ...
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::StagehandConfig;
use crate::error::Result;
use crate::housekeeping::HousekeepingScheduler;
use crate::notifications::NotificationHub;
use crate::orchestration::{
    Orchestrator, RetryDecisionEngine, StageExecutors, StandardErrorClassifier, WorkerPool,
};
use crate::queue::{DelayedQueue, InMemoryDelayedQueue};
use crate::recovery::RecoveryScheduler;
use crate::store::{InMemoryJobStore, JobStore};

/// Fully wired engine; cheap to share, nothing runs until [`StagehandSystem::start`]
#[derive(Debug, Clone)]
pub struct StagehandSystem {
    orchestrator: Arc<Orchestrator>,
    recovery: Arc<RecoveryScheduler>,
    housekeeping: Arc<HousekeepingScheduler>,
    worker_pool: Arc<WorkerPool>,
    hub: Arc<NotificationHub>,
}

impl StagehandSystem {
    /// Validate the configuration and wire every component over the given backends
    pub fn with_backends(
        config: &StagehandConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn DelayedQueue>,
        executors: StageExecutors,
    ) -> Result<Self> {
        config.validate()?;

        let classifier = Arc::new(StandardErrorClassifier::new());
        let retry_engine = Arc::new(RetryDecisionEngine::from_config(classifier, &config.retry)?);
        let hub = Arc::new(NotificationHub::new(&config.notifications));
        let orchestrator = Arc::new(Orchestrator::new(
            store,
            queue,
            executors,
            retry_engine,
            Arc::clone(&hub),
            config.orchestrator.clone(),
        ));
        let recovery = Arc::new(RecoveryScheduler::new(
            Arc::clone(&orchestrator),
            config.recovery.clone(),
        ));
        let housekeeping = Arc::new(HousekeepingScheduler::with_default_tasks(
            Arc::clone(&orchestrator),
            Arc::clone(&recovery),
            &config.housekeeping,
        ));
        let worker_pool = Arc::new(WorkerPool::new(Arc::clone(&orchestrator)));

        Ok(Self {
            orchestrator,
            recovery,
            housekeeping,
            worker_pool,
            hub,
        })
    }

    /// In-process store and queue; used by tests and single-node deployments
    pub fn in_memory(config: &StagehandConfig, executors: StageExecutors) -> Result<Self> {
        Self::with_backends(
            config,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemoryDelayedQueue::new()),
            executors,
        )
    }

    /// PostgreSQL-backed store and queue using `database.url`
    #[cfg(feature = "postgres")]
    pub async fn connect_postgres(config: &StagehandConfig, executors: StageExecutors) -> Result<Self> {
        use crate::config::ConfigurationError;
        use crate::queue::PostgresDelayedQueue;
        use crate::store::PostgresJobStore;

        let url = config.database.url.as_deref().ok_or_else(|| {
            ConfigurationError::invalid_value("database.url", "", "required for the postgres backend")
        })?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(url)
            .await?;
        info!(
            max_connections = config.database.max_connections,
            "✅ Connected to PostgreSQL"
        );
        if config.database.run_migrations {
            crate::database::run_migrations(&pool)
                .await
                .map_err(crate::store::StoreError::from)?;
        }

        Self::with_backends(
            config,
            Arc::new(PostgresJobStore::new(pool.clone())),
            Arc::new(PostgresDelayedQueue::new(pool)),
            executors,
        )
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn recovery(&self) -> &Arc<RecoveryScheduler> {
        &self.recovery
    }

    pub fn housekeeping(&self) -> &Arc<HousekeepingScheduler> {
        &self.housekeeping
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Spawn the worker pool, the heartbeat and the housekeeping loop
    pub fn start(&self) -> SystemHandle {
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let pool = Arc::clone(&self.worker_pool);
        let token = cancel.clone();
        tasks.spawn(async move { pool.run(token).await });

        let hub = Arc::clone(&self.hub);
        let token = cancel.clone();
        tasks.spawn(async move { hub.run_heartbeat(token).await });

        let housekeeping = Arc::clone(&self.housekeeping);
        let token = cancel.clone();
        tasks.spawn(async move { housekeeping.run(token).await });

        info!("🚀 STAGEHAND: System started");
        SystemHandle { cancel, tasks }
    }
}

/// Running background loops of a started system
#[derive(Debug)]
pub struct SystemHandle {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl SystemHandle {
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Token observed by every loop; cancelling it has the same effect as `stop`
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every loop and wait for in-flight work to drain
    pub async fn stop(mut self) {
        if self.cancel.is_cancelled() {
            warn!("Stagehand system already stopping");
        }
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Background loop ended abnormally");
            }
        }
        info!("🛑 STAGEHAND: System stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewJob;
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_memory_system_starts_and_stops() {
        let system = StagehandSystem::in_memory(&StagehandConfig::default(), StageExecutors::new()).unwrap();
        assert_eq!(system.housekeeping().task_names().len(), 5);

        let handle = system.start();
        assert!(handle.is_running());
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = StagehandConfig::default();
        config.orchestrator.worker_concurrency = 0;
        assert!(StagehandSystem::in_memory(&config, StageExecutors::new()).is_err());
    }

    #[tokio::test]
    async fn test_submit_through_system() {
        let system = StagehandSystem::in_memory(&StagehandConfig::default(), StageExecutors::new()).unwrap();
        let (id, correlation_id) = system
            .orchestrator()
            .submit(NewJob::new("input://1", "owner-1"))
            .await
            .unwrap();
        let status = system.orchestrator().job_status(id).await.unwrap();
        assert_eq!(status.correlation_id, correlation_id);
    }
}
