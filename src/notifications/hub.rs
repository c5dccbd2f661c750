//! # Notification Hub
//!
//! Best-effort push delivery of job events to their owners, plus a broadcast channel
//! for operators.
//!
//! Each subject has at most one live connection. Connecting again replaces the old
//! connection, which receives a `close` frame. `send` never blocks: when the
//! connection's buffer is full or the client is gone, the stale connection is dropped
//! and `send` returns `false`. Delivery failures are never job failures.
//!
//! A heartbeat task pings every connection; a connection that has not acknowledged
//! within the ack timeout is disconnected.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::events::{NotificationEvent, OperatorNotice, PushMessage};
use super::registry::{ConnectionHandle, ConnectionRegistry, DashMapConnectionRegistry};
use crate::config::NotificationConfig;
use crate::metrics;
use crate::models::SubjectId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("Connection rejected: {0}")]
    Unauthorized(String),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),
}

pub type HubResult<T> = Result<T, HubError>;

/// Resolves a connection token to the subject it authenticates
pub trait SubjectVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<SubjectId>;
}

/// Receiving half handed to the transport layer
pub struct PushConnection {
    pub id: Uuid,
    pub subject: SubjectId,
    receiver: mpsc::Receiver<PushMessage>,
    last_ack: Arc<AtomicI64>,
}

impl fmt::Debug for PushConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConnection")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .finish()
    }
}

impl PushConnection {
    /// Next frame; `None` once the hub has dropped this connection
    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PushMessage> {
        self.receiver.try_recv().ok()
    }

    /// Record a client acknowledgement (pong)
    pub fn acknowledge(&self) {
        self.last_ack
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub disconnected: usize,
}

pub struct NotificationHub {
    registry: Arc<dyn ConnectionRegistry>,
    operator_tx: broadcast::Sender<OperatorNotice>,
    channel_capacity: usize,
    heartbeat_interval: Duration,
    ack_timeout: chrono::Duration,
}

impl fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHub")
            .field("connections", &self.registry.len())
            .field("channel_capacity", &self.channel_capacity)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(&NotificationConfig::default())
    }
}

impl NotificationHub {
    pub fn new(config: &NotificationConfig) -> Self {
        Self::with_registry(Arc::new(DashMapConnectionRegistry::new()), config)
    }

    pub fn with_registry(registry: Arc<dyn ConnectionRegistry>, config: &NotificationConfig) -> Self {
        let (operator_tx, _) = broadcast::channel(config.operator_channel_capacity.max(1));
        Self {
            registry,
            operator_tx,
            channel_capacity: config.channel_capacity.max(1),
            heartbeat_interval: config.heartbeat_interval(),
            ack_timeout: config.ack_timeout(),
        }
    }

    /// Open the subject's push channel, closing any previous one
    pub fn connect(&self, subject: impl Into<SubjectId>) -> HubResult<PushConnection> {
        let subject = subject.into();
        if subject.trim().is_empty() {
            return Err(HubError::InvalidSubject("subject id must not be empty".to_string()));
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let handle = ConnectionHandle::new(subject.clone(), tx);
        let connection = PushConnection {
            id: handle.id,
            subject: subject.clone(),
            receiver: rx,
            last_ack: Arc::clone(&handle.last_ack),
        };

        // capacity is at least one, the fresh channel always has room
        let _ = handle
            .sender
            .try_send(PushMessage::connection(&subject, handle.id));

        if let Some(previous) = self.registry.insert(handle) {
            let _ = previous.sender.try_send(PushMessage::close("replaced by a new connection"));
            debug!(subject = %subject, replaced = %previous.id, "Replaced push connection");
        }

        info!(subject = %subject, connection_id = %connection.id, "🔌 PUSH_CONNECTED");
        Ok(connection)
    }

    /// Connect after resolving `token` to a subject; rejected tokens never reach the registry
    pub fn connect_authenticated(
        &self,
        token: &str,
        verifier: &dyn SubjectVerifier,
    ) -> HubResult<PushConnection> {
        let subject = verifier
            .verify(token)
            .ok_or_else(|| HubError::Unauthorized("token did not resolve to a subject".to_string()))?;
        self.connect(subject)
    }

    /// Deliver `event` to its subject. Returns `false` when the subject is not
    /// connected or the delivery failed.
    pub fn send(&self, subject: &str, event: &NotificationEvent) -> bool {
        let Some(handle) = self.registry.get(subject) else {
            debug!(subject = %subject, event_type = %event.event_type, "No live connection");
            return false;
        };

        match handle.sender.try_send(PushMessage::from(event)) {
            Ok(()) => true,
            Err(err) => {
                self.registry.remove_if_current(subject, handle.id);
                metrics::notifications_dropped_total()
                    .add(1, &[KeyValue::new("event_type", event.event_type.clone())]);
                warn!(
                    subject = %subject,
                    connection_id = %handle.id,
                    event_type = %event.event_type,
                    error = %err,
                    "Push delivery failed, dropped stale connection"
                );
                false
            }
        }
    }

    /// Deliver to the event's own subject
    pub fn publish(&self, event: &NotificationEvent) -> bool {
        self.send(&event.subject_id, event)
    }

    pub fn disconnect(&self, subject: &str) -> bool {
        match self.registry.remove(subject) {
            Some(handle) => {
                let _ = handle.sender.try_send(PushMessage::close("disconnected"));
                info!(subject = %subject, connection_id = %handle.id, "🔌 PUSH_DISCONNECTED");
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self, subject: &str) -> bool {
        self.registry.get(subject).is_some()
    }

    pub fn connected_subjects(&self) -> Vec<SubjectId> {
        self.registry.subjects()
    }

    /// Publish to every operator subscriber; returns how many received it
    pub fn broadcast_operator(&self, notice: OperatorNotice) -> usize {
        match self.operator_tx.send(notice) {
            Ok(receivers) => receivers,
            Err(err) => {
                debug!(title = %err.0.title, "No operator subscribers");
                0
            }
        }
    }

    pub fn subscribe_operator(&self) -> broadcast::Receiver<OperatorNotice> {
        self.operator_tx.subscribe()
    }

    /// Ping every connection and drop the ones that stopped acknowledging
    pub fn heartbeat_once(&self, now: DateTime<Utc>) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();

        for handle in self.registry.snapshot() {
            if now - handle.last_ack_at() > self.ack_timeout {
                if self
                    .registry
                    .remove_if_current(&handle.subject, handle.id)
                    .is_some()
                {
                    let _ = handle.sender.try_send(PushMessage::close("heartbeat timeout"));
                    report.disconnected += 1;
                    info!(subject = %handle.subject, "Push connection timed out");
                }
                continue;
            }

            if handle.sender.try_send(PushMessage::ping()).is_ok() {
                report.pinged += 1;
            } else if self
                .registry
                .remove_if_current(&handle.subject, handle.id)
                .is_some()
            {
                report.disconnected += 1;
            }
        }

        report
    }

    pub async fn run_heartbeat(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Heartbeat loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.heartbeat_once(Utc::now());
                    if report.disconnected > 0 {
                        debug!(
                            pinged = report.pinged,
                            disconnected = report.disconnected,
                            "Heartbeat sweep"
                        );
                    }
                }
            }
        }
    }
}
