//! # Failure Recovery
//!
//! Post-mortem handling of jobs that reached `Failed`: failure analysis and the
//! periodic scan that re-injects, escalates or flags them.

pub mod failure_analyzer;
pub mod recovery_scheduler;

pub use failure_analyzer::{
    Confidence, FailureAnalysis, FailureAnalyzer, FailureCategory, RecommendedAction,
};
pub use recovery_scheduler::{
    failure_insights, FailurePatternReport, JobRecoveryResult, NotificationAudience,
    RecoveryOutcome, RecoveryReport, RecoveryScheduler,
};
