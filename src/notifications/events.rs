use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::events;
use crate::models::{Job, SubjectId};
use crate::state_machine::JobState;

/// State change or escalation destined for a job's owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub subject_id: SubjectId,
    pub job_id: i64,
    pub event_type: String,
    pub state: JobState,
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl NotificationEvent {
    /// Event describing `job` as it is now
    pub fn for_job(job: &Job, event_type: &str, message: impl Into<String>) -> Self {
        Self {
            subject_id: job.owner.clone(),
            job_id: job.id,
            event_type: event_type.to_string(),
            state: job.state,
            progress: job.progress_percent(),
            message: message.into(),
            timestamp: Utc::now(),
            payload: serde_json::json!({
                "correlationId": job.correlation_id,
                "jobKind": job.job_kind,
            }),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        if let (Value::Object(base), Value::Object(extra)) = (&mut self.payload, payload.clone()) {
            base.extend(extra);
        } else {
            self.payload = payload;
        }
        self
    }
}

/// Frame delivered over a push connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub job_id: Option<i64>,
    pub state: Option<JobState>,
    pub progress: Option<u8>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl PushMessage {
    fn frame(message_type: &str, message: impl Into<String>) -> Self {
        Self {
            message_type: message_type.to_string(),
            job_id: None,
            state: None,
            progress: None,
            message: message.into(),
            timestamp: Utc::now(),
            data: Value::Null,
        }
    }

    pub fn connection(subject: &str, connection_id: uuid::Uuid) -> Self {
        let mut frame = Self::frame(events::CONNECTION, "connected");
        frame.data = serde_json::json!({
            "subjectId": subject,
            "connectionId": connection_id,
        });
        frame
    }

    pub fn ping() -> Self {
        Self::frame(events::PING, "ping")
    }

    pub fn close(reason: impl Into<String>) -> Self {
        Self::frame(events::CLOSE, reason)
    }

    pub fn is_close(&self) -> bool {
        self.message_type == events::CLOSE
    }

    pub fn is_ping(&self) -> bool {
        self.message_type == events::PING
    }
}

impl From<&NotificationEvent> for PushMessage {
    fn from(event: &NotificationEvent) -> Self {
        Self {
            message_type: event.event_type.clone(),
            job_id: Some(event.job_id),
            state: Some(event.state),
            progress: Some(event.progress),
            message: event.message.clone(),
            timestamp: event.timestamp,
            data: event.payload.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeSeverity {
    Info,
    Warning,
    Critical,
}

/// Message for the operator channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorNotice {
    pub job_id: Option<i64>,
    pub severity: NoticeSeverity,
    pub title: String,
    pub message: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl OperatorNotice {
    pub fn new(severity: NoticeSeverity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job_id: None,
            severity,
            title: title.into(),
            message: message.into(),
            details: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn for_job(mut self, job_id: i64) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}
