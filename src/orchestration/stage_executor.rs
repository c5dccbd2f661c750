//! # Stage Executors
//!
//! Pluggable business logic for the four pipeline stages. The orchestrator owns the
//! lifecycle; an executor only reads the job snapshot and reports what happened.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::error_classifier::StageError;
use crate::models::Job;
use crate::state_machine::Stage;

/// Result of one successful executor invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Stage finished; the string is the opaque reference to its output
    Advanced(String),
    /// External state not ready yet; check again later without consuming a retry
    Hold { recheck_after: Duration },
    /// Input rejected as not belonging to this pipeline. Only valid for Lookup and
    /// Confirmation.
    Returned,
}

#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<StageOutcome, StageError>;
}

/// One executor per stage
#[derive(Clone, Default)]
pub struct StageExecutors {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl fmt::Debug for StageExecutors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stages: Vec<_> = self.executors.keys().collect();
        stages.sort();
        f.debug_struct("StageExecutors")
            .field("stages", &stages)
            .finish()
    }
}

impl StageExecutors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: Stage, executor: Arc<dyn StageExecutor>) -> Self {
        self.executors.insert(stage, executor);
        self
    }

    pub fn register(&mut self, stage: Stage, executor: Arc<dyn StageExecutor>) {
        self.executors.insert(stage, executor);
    }

    pub fn get(&self, stage: Stage) -> Option<&Arc<dyn StageExecutor>> {
        self.executors.get(&stage)
    }

    /// Stages without an executor
    pub fn missing(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| !self.executors.contains_key(stage))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl StageExecutor for Fixed {
        async fn execute(&self, _job: &Job) -> Result<StageOutcome, StageError> {
            Ok(StageOutcome::Advanced(self.0.to_string()))
        }
    }

    #[test]
    fn test_missing_stages() {
        let executors = StageExecutors::new()
            .with(Stage::Recognition, Arc::new(Fixed("r")))
            .with(Stage::Generation, Arc::new(Fixed("d")));
        assert_eq!(executors.missing(), vec![Stage::Lookup, Stage::Confirmation]);
        assert!(executors.get(Stage::Recognition).is_some());
        assert!(executors.get(Stage::Lookup).is_none());
    }
}
