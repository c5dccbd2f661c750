//! # Structured Logging Module
//!
//! Process-wide `tracing` subscriber setup plus a handful of helpers that give the
//! job lifecycle events a consistent shape in the logs.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging from environment defaults
pub fn init_structured_logging() {
    init_structured_logging_with(&LoggingConfig::default());
}

/// Initialize structured logging; `RUST_LOG` takes precedence over the configured level
pub fn init_structured_logging_with(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
        let json = config.format == "json";

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        // Another subscriber (test harness, embedding app) may already be installed
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = std::process::id(),
            format = if json { "json" } else { "pretty" },
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log a committed state transition
pub fn log_job_transition(
    job_id: i64,
    correlation_id: &str,
    from_state: &str,
    to_state: &str,
    event: &str,
) {
    tracing::info!(
        job_id = job_id,
        correlation_id = %correlation_id,
        from_state = %from_state,
        to_state = %to_state,
        event = %event,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 JOB_TRANSITION"
    );
}

/// Log a classified stage failure and the retry verdict
pub fn log_stage_failure(
    job_id: i64,
    stage: &str,
    category: &str,
    attempt: u32,
    will_retry: bool,
    message: &str,
) {
    tracing::warn!(
        job_id = job_id,
        stage = %stage,
        category = %category,
        attempt = attempt,
        will_retry = will_retry,
        error = %message,
        "⚠️ STAGE_FAILURE"
    );
}

/// Log the disposition chosen for a terminal-failed job
pub fn log_recovery_decision(
    job_id: i64,
    category: &str,
    action: &str,
    confidence: &str,
    recovery_attempts: u32,
) {
    tracing::info!(
        job_id = job_id,
        category = %category,
        action = %action,
        confidence = %confidence,
        recovery_attempts = recovery_attempts,
        "🩺 RECOVERY_DECISION"
    );
}

/// Log the completion of a periodic task run
pub fn log_housekeeping_run(task: &str, queue: &str, success: bool, duration_ms: u64) {
    if success {
        tracing::info!(
            task = %task,
            queue = %queue,
            duration_ms = duration_ms,
            "🧹 HOUSEKEEPING_RUN"
        );
    } else {
        tracing::error!(
            task = %task,
            queue = %queue,
            duration_ms = duration_ms,
            "🧹 HOUSEKEEPING_RUN failed"
        );
    }
}
