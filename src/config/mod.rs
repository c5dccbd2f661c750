//! # Configuration
//!
//! Typed configuration for every component of the engine. All fields carry defaults so a
//! bare `StagehandConfig::default()` is a working setup; [`ConfigManager`] layers a file
//! and `STAGEHAND__*` environment variables on top.
//!
//! ```toml
//! [orchestrator]
//! stage_timeout_secs = 120
//! worker_concurrency = 16
//!
//! [retry.overrides.api_rate_limit]
//! decision = "retry_with_delay"
//! max_retries = 5
//! base_delay_secs = 600
//! max_delay_secs = 3600
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::limits;
use crate::orchestration::{ErrorCategory, RetryDecision, RetryStrategy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagehandConfig {
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryConfig,
    pub recovery: RecoveryConfig,
    pub notifications: NotificationConfig,
    pub housekeeping: HousekeepingConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Upper bound on a single stage invocation
    pub stage_timeout_secs: u64,
    pub worker_concurrency: usize,
    pub poll_interval_ms: u64,
    /// How long a claimed work item stays invisible before it is handed out again
    pub claim_visibility_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: 300,
            worker_concurrency: 8,
            poll_interval_ms: 250,
            claim_visibility_secs: 600,
        }
    }
}

impl OrchestratorConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn claim_visibility(&self) -> Duration {
        Duration::from_secs(self.claim_visibility_secs)
    }
}

/// Category strategy as written in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    pub decision: RetryDecision,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub base_delay_secs: u64,
    #[serde(default)]
    pub max_delay_secs: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

impl From<&RetryStrategyConfig> for RetryStrategy {
    fn from(cfg: &RetryStrategyConfig) -> Self {
        RetryStrategy {
            decision: cfg.decision,
            max_retries: cfg.max_retries,
            base_delay: Duration::from_secs(cfg.base_delay_secs),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
            backoff_factor: cfg.backoff_factor,
            jitter: cfg.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Global jitter switch; when false no strategy adds noise
    pub jitter: bool,
    pub history_size: usize,
    /// Register the per-kind presets (tracking, document) on top of the category table
    pub use_kind_presets: bool,
    /// Category name (snake_case) to strategy
    pub overrides: HashMap<String, RetryStrategyConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            jitter: true,
            history_size: limits::ERROR_HISTORY_SIZE,
            use_kind_presets: false,
            overrides: HashMap::new(),
        }
    }
}

impl RetryConfig {
    /// Parsed category overrides
    pub fn category_overrides(&self) -> ConfigResult<Vec<(ErrorCategory, RetryStrategy)>> {
        self.overrides
            .iter()
            .map(|(name, cfg)| {
                let category = ErrorCategory::from_str(name).map_err(|e| {
                    ConfigurationError::invalid_value("retry.overrides", name, e)
                })?;
                Ok((category, RetryStrategy::from(cfg)))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub scan_interval_secs: u64,
    pub scan_window_hours: u64,
    /// Jobs updated more recently than this are left to live processing
    pub quiet_interval_secs: u64,
    pub max_recovery_attempts: u32,
    pub scan_limit: usize,
    pub network_base_delay_secs: u64,
    pub system_base_delay_secs: u64,
    pub temporary_base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 1800,
            scan_window_hours: 24,
            quiet_interval_secs: 300,
            max_recovery_attempts: limits::MAX_RECOVERY_ATTEMPTS,
            scan_limit: 100,
            network_base_delay_secs: 30,
            system_base_delay_secs: 300,
            temporary_base_delay_secs: 180,
            max_delay_secs: limits::MAX_RECOVERY_DELAY_SECS,
        }
    }
}

impl RecoveryConfig {
    pub fn scan_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.scan_window_hours as i64)
    }

    pub fn quiet_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.quiet_interval_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Per-connection buffer; a full buffer counts as a failed delivery
    pub channel_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub ack_timeout_secs: u64,
    pub operator_channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            heartbeat_interval_secs: 30,
            ack_timeout_secs: 90,
            operator_channel_capacity: 256,
        }
    }
}

impl NotificationConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn ack_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ack_timeout_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HousekeepingConfig {
    pub tick_interval_secs: u64,
    pub stuck_threshold_minutes: u64,
    pub stuck_max_retries: u32,
    pub stuck_max_age_hours: u64,
    pub max_job_lifetime_hours: u64,
    pub completed_retention_days: u64,
    pub failed_retention_days: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            stuck_threshold_minutes: 30,
            stuck_max_retries: limits::STUCK_MAX_RETRIES,
            stuck_max_age_hours: 24,
            max_job_lifetime_hours: 24 * 7,
            completed_retention_days: 30,
            failed_retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub password: Option<String>,
    pub max_connections: u32,
    /// Apply the embedded migrations when connecting
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            password: None,
            max_connections: 10,
            run_migrations: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl StagehandConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        let orch = &self.orchestrator;
        if orch.worker_concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.worker_concurrency",
                orch.worker_concurrency,
                "must be at least 1",
            ));
        }
        if orch.stage_timeout_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.stage_timeout_secs",
                orch.stage_timeout_secs,
                "must be positive",
            ));
        }
        if orch.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "orchestrator.poll_interval_ms",
                orch.poll_interval_ms,
                "must be positive",
            ));
        }
        if orch.claim_visibility_secs <= orch.stage_timeout_secs {
            return Err(ConfigurationError::inconsistent(
                "orchestrator.claim_visibility_secs",
                "orchestrator.stage_timeout_secs",
                "claimed work would reappear while its stage is still running",
            ));
        }

        if self.retry.history_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.history_size",
                self.retry.history_size,
                "must be at least 1",
            ));
        }
        for (category, strategy) in self.retry.category_overrides()? {
            if strategy.decision != RetryDecision::NoRetry
                && strategy.decision != RetryDecision::RetryImmediately
                && strategy.base_delay > strategy.max_delay
            {
                return Err(ConfigurationError::inconsistent(
                    format!("retry.overrides.{category}.base_delay_secs"),
                    format!("retry.overrides.{category}.max_delay_secs"),
                    "base delay exceeds max delay",
                ));
            }
            if strategy.backoff_factor < 1.0 {
                return Err(ConfigurationError::invalid_value(
                    format!("retry.overrides.{category}.backoff_factor"),
                    strategy.backoff_factor,
                    "must be >= 1.0",
                ));
            }
        }

        let rec = &self.recovery;
        if rec.max_recovery_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "recovery.max_recovery_attempts",
                rec.max_recovery_attempts,
                "must be at least 1",
            ));
        }
        if rec.scan_interval_secs == 0 || rec.scan_window_hours == 0 {
            return Err(ConfigurationError::invalid_value(
                "recovery.scan_interval_secs",
                rec.scan_interval_secs,
                "scan interval and window must be positive",
            ));
        }
        for (field, base) in [
            ("recovery.network_base_delay_secs", rec.network_base_delay_secs),
            ("recovery.system_base_delay_secs", rec.system_base_delay_secs),
            ("recovery.temporary_base_delay_secs", rec.temporary_base_delay_secs),
        ] {
            if base > rec.max_delay_secs {
                return Err(ConfigurationError::inconsistent(
                    field,
                    "recovery.max_delay_secs",
                    "base delay exceeds max delay",
                ));
            }
        }

        let notif = &self.notifications;
        if notif.channel_capacity == 0 || notif.operator_channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "notifications.channel_capacity",
                notif.channel_capacity,
                "channel capacities must be at least 1",
            ));
        }
        if notif.heartbeat_interval_secs == 0 {
            return Err(ConfigurationError::invalid_value(
                "notifications.heartbeat_interval_secs",
                notif.heartbeat_interval_secs,
                "must be positive",
            ));
        }
        if notif.ack_timeout_secs <= notif.heartbeat_interval_secs {
            return Err(ConfigurationError::inconsistent(
                "notifications.ack_timeout_secs",
                "notifications.heartbeat_interval_secs",
                "ack timeout must be longer than the heartbeat interval",
            ));
        }

        let hk = &self.housekeeping;
        if hk.completed_retention_days < 1 || hk.failed_retention_days < 1 {
            return Err(ConfigurationError::invalid_value(
                "housekeeping.failed_retention_days",
                hk.failed_retention_days.min(hk.completed_retention_days),
                "retention must be at least one day",
            ));
        }
        if hk.tick_interval_secs == 0 || hk.stuck_threshold_minutes == 0 {
            return Err(ConfigurationError::invalid_value(
                "housekeeping.tick_interval_secs",
                hk.tick_interval_secs,
                "tick interval and stuck threshold must be positive",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                self.database.max_connections,
                "must be at least 1",
            ));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigurationError::invalid_value(
                "logging.format",
                other,
                "expected 'pretty' or 'json'",
            )),
        }
    }
}
