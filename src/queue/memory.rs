use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

use super::{offset_from, DelayedQueue, QueueResult, WorkItem};

#[derive(Debug, Default)]
struct QueueState {
    /// Keyed by (run_at, insertion sequence) so equal times keep FIFO order
    ready: BTreeMap<(DateTime<Utc>, u64), WorkItem>,
    in_flight: HashMap<Uuid, (WorkItem, DateTime<Utc>)>,
    seq: u64,
}

impl QueueState {
    fn push(&mut self, item: WorkItem) {
        self.seq += 1;
        self.ready.insert((item.run_at, self.seq), item);
    }

    /// Return expired claims to the ready set
    fn reclaim_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((item, _)) = self.in_flight.remove(&id) {
                self.push(item);
            }
        }
    }
}

/// Process-local delayed queue. Does not survive restarts; use the Postgres queue
/// where that matters.
#[derive(Debug, Default)]
pub struct InMemoryDelayedQueue {
    state: Mutex<QueueState>,
}

impl InMemoryDelayedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}

#[async_trait]
impl DelayedQueue for InMemoryDelayedQueue {
    async fn schedule(&self, item: WorkItem) -> QueueResult<()> {
        self.state.lock().push(item);
        Ok(())
    }

    async fn claim_due(&self, limit: usize, visibility: Duration) -> QueueResult<Vec<WorkItem>> {
        let now = Utc::now();
        let deadline = offset_from(now, visibility);

        let mut state = self.state.lock();
        state.reclaim_expired(now);

        let due: Vec<(DateTime<Utc>, u64)> = state
            .ready
            .range(..=(now, u64::MAX))
            .take(limit)
            .map(|(key, _)| *key)
            .collect();

        let mut claimed = Vec::with_capacity(due.len());
        for key in due {
            if let Some(mut item) = state.ready.remove(&key) {
                item.attempts += 1;
                state.in_flight.insert(item.id, (item.clone(), deadline));
                claimed.push(item);
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, id: Uuid) -> QueueResult<bool> {
        Ok(self.state.lock().in_flight.remove(&id).is_some())
    }

    async fn next_run_at(&self) -> QueueResult<Option<DateTime<Utc>>> {
        let state = self.state.lock();
        let next_ready = state.ready.keys().next().map(|(at, _)| *at);
        let next_reclaim = state.in_flight.values().map(|(_, deadline)| *deadline).min();
        Ok(match (next_ready, next_reclaim) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }

    async fn len(&self) -> QueueResult<usize> {
        let state = self.state.lock();
        Ok(state.ready.len() + state.in_flight.len())
    }

    async fn pending(&self) -> QueueResult<Vec<WorkItem>> {
        Ok(self.state.lock().ready.values().cloned().collect())
    }
}
