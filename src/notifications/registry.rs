//! Subject → live connection table.
//!
//! The hub never touches the map directly; everything goes through
//! [`ConnectionRegistry`] so a sharded or externally backed table can be swapped in.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::PushMessage;
use crate::models::SubjectId;

/// Sending half of one push connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub subject: SubjectId,
    pub sender: mpsc::Sender<PushMessage>,
    pub connected_at: DateTime<Utc>,
    /// Unix millis of the last client acknowledgement
    pub last_ack: Arc<AtomicI64>,
}

impl ConnectionHandle {
    pub fn new(subject: SubjectId, sender: mpsc::Sender<PushMessage>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subject,
            sender,
            connected_at: now,
            last_ack: Arc::new(AtomicI64::new(now.timestamp_millis())),
        }
    }

    pub fn last_ack_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_ack.load(Ordering::Acquire))
            .unwrap_or(self.connected_at)
    }
}

pub trait ConnectionRegistry: Send + Sync {
    /// Store `handle` for its subject, returning the connection it replaced
    fn insert(&self, handle: ConnectionHandle) -> Option<ConnectionHandle>;

    fn get(&self, subject: &str) -> Option<ConnectionHandle>;

    fn remove(&self, subject: &str) -> Option<ConnectionHandle>;

    /// Remove the subject's entry only if it is still connection `connection_id`
    fn remove_if_current(&self, subject: &str, connection_id: Uuid) -> Option<ConnectionHandle>;

    fn subjects(&self) -> Vec<SubjectId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<ConnectionHandle>;
}

#[derive(Debug, Default)]
pub struct DashMapConnectionRegistry {
    connections: DashMap<SubjectId, ConnectionHandle>,
}

impl DashMapConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionRegistry for DashMapConnectionRegistry {
    fn insert(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.connections.insert(handle.subject.clone(), handle)
    }

    fn get(&self, subject: &str) -> Option<ConnectionHandle> {
        self.connections.get(subject).map(|entry| entry.value().clone())
    }

    fn remove(&self, subject: &str) -> Option<ConnectionHandle> {
        self.connections.remove(subject).map(|(_, handle)| handle)
    }

    fn remove_if_current(&self, subject: &str, connection_id: Uuid) -> Option<ConnectionHandle> {
        self.connections
            .remove_if(subject, |_, handle| handle.id == connection_id)
            .map(|(_, handle)| handle)
    }

    fn subjects(&self) -> Vec<SubjectId> {
        let mut subjects: Vec<SubjectId> =
            self.connections.iter().map(|entry| entry.key().clone()).collect();
        subjects.sort();
        subjects
    }

    fn len(&self) -> usize {
        self.connections.len()
    }

    fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }
}
