//! # Engine Metrics
//!
//! OpenTelemetry instruments for the job lifecycle. The crate only records; wiring an
//! exporter onto the global meter provider is left to the embedding process. Without one
//! the instruments are no-ops.
//!
//! ```rust
//! use opentelemetry::KeyValue;
//! use stagehand::metrics;
//!
//! metrics::stages_failed_total().add(
//!     1,
//!     &[KeyValue::new("category", "network_error")],
//! );
//! ```

use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::sync::OnceLock;

static STAGEHAND_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    STAGEHAND_METER.get_or_init(|| opentelemetry::global::meter("stagehand"))
}

/// Jobs accepted by `submit`
pub fn jobs_submitted_total() -> Counter<u64> {
    meter()
        .u64_counter("stagehand.jobs.submitted.total")
        .with_description("Total number of jobs submitted")
        .build()
}

/// Stage executions that advanced a job
///
/// Labels:
/// - stage: Stage name
pub fn stages_completed_total() -> Counter<u64> {
    meter()
        .u64_counter("stagehand.stages.completed.total")
        .with_description("Total number of successful stage executions")
        .build()
}

/// Stage executions that raised an error
///
/// Labels:
/// - stage: Stage name
/// - category: Classified error category
pub fn stages_failed_total() -> Counter<u64> {
    meter()
        .u64_counter("stagehand.stages.failed.total")
        .with_description("Total number of failed stage executions")
        .build()
}

/// Deferred retries placed on the work queue
pub fn retries_scheduled_total() -> Counter<u64> {
    meter()
        .u64_counter("stagehand.retries.scheduled.total")
        .with_description("Total number of stage retries scheduled")
        .build()
}

/// Jobs that reached the failed state
pub fn jobs_failed_total() -> Counter<u64> {
    meter()
        .u64_counter("stagehand.jobs.failed.total")
        .with_description("Total number of jobs that failed terminally")
        .build()
}

/// Failed jobs re-injected by the recovery sweep
pub fn recovery_recovered_total() -> Counter<u64> {
    meter()
        .u64_counter("stagehand.recovery.recovered.total")
        .with_description("Total number of failed jobs automatically recovered")
        .build()
}

/// Failed jobs escalated to a notification or manual review
///
/// Labels:
/// - disposition: notify_admin | notify_user | manual_review
pub fn recovery_escalated_total() -> Counter<u64> {
    meter()
        .u64_counter("stagehand.recovery.escalated.total")
        .with_description("Total number of failed jobs escalated to humans")
        .build()
}

/// Push messages that could not be delivered
pub fn notifications_dropped_total() -> Counter<u64> {
    meter()
        .u64_counter("stagehand.notifications.dropped.total")
        .with_description("Total number of push messages dropped on a stale channel")
        .build()
}

/// Wall time of a single stage execution in milliseconds
pub fn stage_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("stagehand.stages.duration")
        .with_description("Stage execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
