//! # System Constants
//!
//! Event names, queue names and the operational limits shared by the orchestrator,
//! the recovery scheduler and the housekeeping tasks.

/// Push event types delivered through the notification hub
pub mod events {
    pub const JOB_SUBMITTED: &str = "job.submitted";
    pub const JOB_STAGE_STARTED: &str = "job.stage_started";
    pub const JOB_STAGE_COMPLETED: &str = "job.stage_completed";
    pub const JOB_RETRY_SCHEDULED: &str = "job.retry_scheduled";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_RETURNED: &str = "job.returned";
    pub const JOB_FAILED: &str = "job.failed";
    pub const JOB_REVOKED: &str = "job.revoked";
    pub const JOB_RECOVERY_SCHEDULED: &str = "job.recovery_scheduled";
    pub const JOB_ATTENTION_REQUIRED: &str = "job.attention_required";

    // Transport frames
    pub const CONNECTION: &str = "connection";
    pub const PING: &str = "ping";
    pub const CLOSE: &str = "close";
}

/// Target queues used by the housekeeping schedule
pub mod queues {
    pub const HIGH_PRIORITY: &str = "high_priority";
    pub const TRACKING: &str = "tracking";
    pub const RECOVERY: &str = "recovery";
    pub const REPORTING: &str = "reporting";
    pub const MAINTENANCE: &str = "maintenance";
}

/// Operational limits
pub mod limits {
    /// Recovery attempts allowed on a terminal-failed job
    pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;

    /// Rolling error history kept per job kind
    pub const ERROR_HISTORY_SIZE: usize = 50;

    /// Entries returned as "recent" in error statistics
    pub const RECENT_ERRORS: usize = 10;

    /// Stored error messages are truncated to this many characters in history
    pub const ERROR_MESSAGE_PREVIEW: usize = 200;

    /// Recovery delay ceiling in seconds
    pub const MAX_RECOVERY_DELAY_SECS: u64 = 3600;

    /// Exponent cap for recovery backoff
    pub const RECOVERY_BACKOFF_EXPONENT_CAP: u32 = 4;

    /// Retry cap used by the stuck-job sweep
    pub const STUCK_MAX_RETRIES: u32 = 3;
}

/// Job kind used when a submission doesn't name one
pub const DEFAULT_JOB_KIND: &str = "tracking";

/// Prefix of externally visible job correlation ids
pub const CORRELATION_ID_PREFIX: &str = "job_";
