use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::queue::offset_from;

/// When a periodic task fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Fixed period measured from the previous fire time
    Every(Duration),
    /// Once a day at `hour:minute` UTC
    Daily { hour: u32, minute: u32 },
    /// Every hour at each listed minute
    Minutes(Vec<u32>),
}

impl Schedule {
    pub fn every_minutes(minutes: u64) -> Self {
        Self::Every(Duration::from_secs(minutes * 60))
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Every(period) => offset_from(after, (*period).max(Duration::from_secs(1))),
            Self::Daily { hour, minute } => {
                let today = after
                    .date_naive()
                    .and_hms_opt(*hour, *minute, 0)
                    .map(|naive| naive.and_utc());
                match today {
                    Some(at) if at > after => at,
                    Some(at) => at + ChronoDuration::days(1),
                    None => after + ChronoDuration::days(1),
                }
            }
            Self::Minutes(minutes) => {
                let mut valid: Vec<u32> = minutes.iter().copied().filter(|m| *m < 60).collect();
                valid.sort_unstable();
                valid.dedup();
                let Ok(hour_start) = after.duration_trunc(ChronoDuration::hours(1)) else {
                    return after + ChronoDuration::hours(1);
                };
                (0..=1)
                    .flat_map(|h| {
                        valid.iter().map(move |m| {
                            hour_start + ChronoDuration::hours(h) + ChronoDuration::minutes(i64::from(*m))
                        })
                    })
                    .find(|at| *at > after)
                    .unwrap_or(after + ChronoDuration::hours(1))
            }
        }
    }
}

/// Re-run policy for a failed task invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: bool,
    pub jitter: bool,
}

impl TaskRetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff: true,
            jitter: true,
        }
    }

    /// Wait before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = if self.backoff {
            self.base_delay.saturating_mul(1u32 << attempt.min(16))
        } else {
            self.base_delay
        };
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-0.1..=0.1);
        base.mul_f64(factor)
    }
}

/// Declaration of a periodic task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub target_queue: String,
    pub schedule: Schedule,
    /// Higher runs first when several tasks are due together
    pub priority: u8,
    pub retry: Option<TaskRetryPolicy>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, target_queue: impl Into<String>, schedule: Schedule, priority: u8) -> Self {
        Self {
            name: name.into(),
            target_queue: target_queue.into(),
            schedule,
            priority,
            retry: None,
        }
    }

    pub fn with_retry(mut self, policy: TaskRetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}
