use serde::{Deserialize, Serialize};

use super::states::Stage;

/// Events that can trigger job state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    /// Pick up a pending job
    Start,
    /// The running stage produced its output
    StageSucceeded,
    /// Move a confirmed job into document generation
    BeginGeneration,
    /// Lookup or confirmation ended the pipeline with a domain return
    Return,
    /// Terminal failure
    Fail,
    /// External cancellation
    Revoke,
    /// Keep the current state but record a retry, hold or sweep
    Reschedule,
    /// Re-inject a failed job at the given stage
    Recover(Stage),
    /// Record analysis results on a failed job
    Annotate,
}

impl JobEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::StageSucceeded => "stage_succeeded",
            Self::BeginGeneration => "begin_generation",
            Self::Return => "return",
            Self::Fail => "fail",
            Self::Revoke => "revoke",
            Self::Reschedule => "reschedule",
            Self::Recover(_) => "recover",
            Self::Annotate => "annotate",
        }
    }

    /// Events still accepted once a job has been revoked
    pub fn allowed_after_revoke(&self) -> bool {
        matches!(self, Self::Fail | Self::Revoke | Self::Annotate)
    }
}
