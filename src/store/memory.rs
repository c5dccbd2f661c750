use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{CasOutcome, JobStore, StoreError, StoreResult};
use crate::models::{Job, JobFilter, JobPatch, NewJob};
use crate::state_machine::JobState;

/// Process-local store. The write lock makes each compare-and-set atomic.
#[derive(Debug)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<i64, Job>>,
    next_id: AtomicI64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Insert or replace a job as-is. Lets tests and imports seed arbitrary records.
    pub fn insert_raw(&self, job: Job) {
        self.next_id.fetch_max(job.id + 1, Ordering::SeqCst);
        self.jobs.write().insert(job.id, job);
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new_job: NewJob) -> StoreResult<Job> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let job = Job::from_new(id, new_job, Utc::now());

        let mut jobs = self.jobs.write();
        if jobs.values().any(|j| j.correlation_id == job.correlation_id) {
            return Err(StoreError::DuplicateCorrelationId(job.correlation_id));
        }
        jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get_by_id(&self, id: i64) -> StoreResult<Option<Job>> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> StoreResult<Option<Job>> {
        Ok(self
            .jobs
            .read()
            .values()
            .find(|j| j.correlation_id == correlation_id)
            .cloned())
    }

    async fn compare_and_set_state(
        &self,
        id: i64,
        expected_state: JobState,
        expected_version: i64,
        new_state: JobState,
        patch: JobPatch,
    ) -> StoreResult<CasOutcome> {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(CasOutcome::Conflict { current: None });
        };

        if job.state != expected_state || job.version != expected_version {
            return Ok(CasOutcome::Conflict {
                current: Some(job.clone()),
            });
        }

        patch.apply(job, new_state, Utc::now());
        Ok(CasOutcome::Applied(job.clone()))
    }

    async fn list_by_filter(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let mut matched: Vec<Job> = self
            .jobs
            .read()
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn count_by_state(&self) -> StoreResult<HashMap<JobState, u64>> {
        let mut counts = HashMap::new();
        for job in self.jobs.read().values() {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn purge(&self, filter: &JobFilter) -> StoreResult<u64> {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| !filter.matches(job));
        Ok((before - jobs.len()) as u64)
    }
}
