//! # Retry Decision Engine
//!
//! Decides whether a failed stage is retried and how long to wait.
//!
//! ## Overview
//!
//! Each [`ErrorCategory`] maps to an immutable [`RetryStrategy`]. The engine classifies
//! the failure, looks up the strategy (job-kind overrides first, then the category
//! table) and compares the attempt count against `max_retries`. Delays are computed
//! from the strategy's decision:
//!
//! | Decision            | Delay                                        |
//! |---------------------|----------------------------------------------|
//! | `RetryImmediately`  | 0                                            |
//! | `RetryWithDelay`    | `min(base, max)`                             |
//! | `RetryWithBackoff`  | `min(base * factor^attempt, max)`            |
//!
//! With jitter enabled, a non-zero delay receives uniform noise of ±10%, floored at one
//! second. The result never exceeds `max_delay * 1.1`.
//!
//! Every classification is also appended to a bounded per-kind history used for the
//! error statistics reported by housekeeping.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::error_classifier::{ErrorCategory, ErrorClassifier, StageError, StandardErrorClassifier};
use crate::config::RetryConfig;
use crate::constants::limits;

const JITTER_FRACTION: f64 = 0.1;
const MIN_JITTERED_DELAY_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    RetryImmediately,
    RetryWithDelay,
    RetryWithBackoff,
    NoRetry,
}

impl fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryImmediately => write!(f, "retry_immediately"),
            Self::RetryWithDelay => write!(f, "retry_with_delay"),
            Self::RetryWithBackoff => write!(f, "retry_with_backoff"),
            Self::NoRetry => write!(f, "no_retry"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    pub decision: RetryDecision,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl RetryStrategy {
    pub const fn no_retry() -> Self {
        Self {
            decision: RetryDecision::NoRetry,
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: false,
        }
    }

    pub const fn immediate(max_retries: u32, base_secs: u64, max_secs: u64, factor: f64) -> Self {
        Self {
            decision: RetryDecision::RetryImmediately,
            max_retries,
            base_delay: Duration::from_secs(base_secs),
            max_delay: Duration::from_secs(max_secs),
            backoff_factor: factor,
            jitter: true,
        }
    }

    pub const fn delayed(max_retries: u32, base_secs: u64, max_secs: u64) -> Self {
        Self {
            decision: RetryDecision::RetryWithDelay,
            max_retries,
            base_delay: Duration::from_secs(base_secs),
            max_delay: Duration::from_secs(max_secs),
            backoff_factor: 2.0,
            jitter: true,
        }
    }

    pub const fn backoff(max_retries: u32, base_secs: u64, max_secs: u64, factor: f64) -> Self {
        Self {
            decision: RetryDecision::RetryWithBackoff,
            max_retries,
            base_delay: Duration::from_secs(base_secs),
            max_delay: Duration::from_secs(max_secs),
            backoff_factor: factor,
            jitter: true,
        }
    }

    /// Default strategy for a category
    pub fn for_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::NetworkError => Self::immediate(5, 5, 30, 1.5),
            ErrorCategory::ApiRateLimit => Self::delayed(3, 300, 1800),
            ErrorCategory::DataError => Self::no_retry(),
            ErrorCategory::SystemError => Self::backoff(2, 120, 600, 2.0),
            ErrorCategory::TemporaryError => Self::backoff(3, 60, 300, 2.0),
            ErrorCategory::PermanentError => Self::no_retry(),
        }
    }

    /// Whether attempt number `attempt` (0-based) may be retried
    pub fn permits(&self, attempt: u32) -> bool {
        self.decision != RetryDecision::NoRetry && attempt < self.max_retries
    }

    /// Delay before the retry following `attempt`, jitter excluded
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        match self.decision {
            RetryDecision::NoRetry | RetryDecision::RetryImmediately => Duration::ZERO,
            RetryDecision::RetryWithDelay => self.base_delay.min(self.max_delay),
            RetryDecision::RetryWithBackoff => {
                let scaled =
                    self.base_delay.as_secs_f64() * self.backoff_factor.powf(attempt as f64);
                let capped = if scaled.is_finite() {
                    scaled.min(self.max_delay.as_secs_f64())
                } else {
                    self.max_delay.as_secs_f64()
                };
                Duration::from_secs_f64(capped.max(0.0))
            }
        }
    }

    /// Delay including jitter when enabled
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt).as_secs_f64();
        if !self.jitter || base <= 0.0 {
            return Duration::from_secs_f64(base);
        }

        let noise = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        let jittered = (base + base * noise).max(MIN_JITTERED_DELAY_SECS);
        let ceiling = self.max_delay.as_secs_f64() * (1.0 + JITTER_FRACTION);
        Duration::from_secs_f64(jittered.min(ceiling))
    }
}

/// Answer to `should_retry`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetryVerdict {
    pub retry: bool,
    pub category: ErrorCategory,
    pub strategy: RetryStrategy,
}

/// Classified error kept in the rolling history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub error_kind: String,
    pub category: ErrorCategory,
    pub message: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorStatistics {
    pub job_kind: String,
    pub total_errors: usize,
    pub category_distribution: BTreeMap<String, usize>,
    pub kind_distribution: BTreeMap<String, usize>,
    pub recent_errors: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorAnalysis {
    pub statistics: ErrorStatistics,
    pub dominant_category: Option<ErrorCategory>,
    pub suggestions: Vec<String>,
}

/// Per-kind strategy presets for job kinds whose upstreams behave differently from
/// the category defaults
pub struct RetryStrategyPresets;

impl RetryStrategyPresets {
    /// Lookups against a third-party tracking API: progressive network backoff,
    /// short transient retries
    pub fn tracking() -> HashMap<ErrorCategory, RetryStrategy> {
        HashMap::from([
            (ErrorCategory::NetworkError, RetryStrategy::backoff(4, 5, 60, 2.0)),
            (ErrorCategory::ApiRateLimit, RetryStrategy::delayed(3, 300, 1800)),
            (ErrorCategory::DataError, RetryStrategy::no_retry()),
            (ErrorCategory::TemporaryError, RetryStrategy::backoff(3, 30, 180, 2.0)),
        ])
    }

    /// Document rendering: resource pressure waits longer, file hiccups retry more
    pub fn document() -> HashMap<ErrorCategory, RetryStrategy> {
        HashMap::from([
            (ErrorCategory::DataError, RetryStrategy::no_retry()),
            (ErrorCategory::SystemError, RetryStrategy::delayed(2, 180, 600)),
            (ErrorCategory::TemporaryError, RetryStrategy::backoff(5, 20, 300, 1.8)),
        ])
    }
}

pub struct RetryDecisionEngine {
    classifier: Arc<dyn ErrorClassifier>,
    strategies: HashMap<ErrorCategory, RetryStrategy>,
    kind_strategies: HashMap<String, HashMap<ErrorCategory, RetryStrategy>>,
    jitter_enabled: bool,
    history_size: usize,
    history: Mutex<HashMap<String, VecDeque<ErrorRecord>>>,
}

impl fmt::Debug for RetryDecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryDecisionEngine")
            .field("classifier", &self.classifier.classifier_name())
            .field("strategies", &self.strategies)
            .field("kinds", &self.kind_strategies.keys().collect::<Vec<_>>())
            .field("jitter_enabled", &self.jitter_enabled)
            .finish()
    }
}

impl Default for RetryDecisionEngine {
    fn default() -> Self {
        Self::new(Arc::new(StandardErrorClassifier::new()))
    }
}

impl RetryDecisionEngine {
    pub fn new(classifier: Arc<dyn ErrorClassifier>) -> Self {
        let strategies = ErrorCategory::ALL
            .into_iter()
            .map(|c| (c, RetryStrategy::for_category(c)))
            .collect();
        Self {
            classifier,
            strategies,
            kind_strategies: HashMap::new(),
            jitter_enabled: true,
            history_size: limits::ERROR_HISTORY_SIZE,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Build from configuration: category overrides, presets, jitter and history size
    pub fn from_config(
        classifier: Arc<dyn ErrorClassifier>,
        config: &RetryConfig,
    ) -> crate::config::ConfigResult<Self> {
        let mut engine = Self::new(classifier);
        engine.jitter_enabled = config.jitter;
        engine.history_size = config.history_size.max(1);
        for (category, strategy) in config.category_overrides()? {
            engine.strategies.insert(category, strategy);
        }
        if config.use_kind_presets {
            engine = engine.with_presets();
        }
        Ok(engine)
    }

    pub fn with_category_strategy(mut self, category: ErrorCategory, strategy: RetryStrategy) -> Self {
        self.strategies.insert(category, strategy);
        self
    }

    /// Register strategies for one job kind; missing categories fall back to the table
    pub fn with_kind_strategies(
        mut self,
        job_kind: impl Into<String>,
        strategies: HashMap<ErrorCategory, RetryStrategy>,
    ) -> Self {
        self.kind_strategies.insert(job_kind.into(), strategies);
        self
    }

    pub fn with_presets(self) -> Self {
        self.with_kind_strategies("tracking", RetryStrategyPresets::tracking())
            .with_kind_strategies("document", RetryStrategyPresets::document())
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_enabled = false;
        self
    }

    pub fn classifier(&self) -> &Arc<dyn ErrorClassifier> {
        &self.classifier
    }

    pub fn classify(&self, error: &StageError) -> ErrorCategory {
        self.classifier.classify(error)
    }

    /// Effective strategy for a category and job kind
    pub fn strategy_for(&self, category: ErrorCategory, job_kind: &str) -> RetryStrategy {
        let mut strategy = self
            .kind_strategies
            .get(job_kind)
            .and_then(|m| m.get(&category))
            .or_else(|| self.strategies.get(&category))
            .copied()
            .unwrap_or_else(|| RetryStrategy::for_category(category));
        if !self.jitter_enabled {
            strategy.jitter = false;
        }
        strategy
    }

    /// Classify `error`, record it, and decide whether `attempt` may be retried
    pub fn should_retry(&self, error: &StageError, attempt: u32, job_kind: &str) -> RetryVerdict {
        let category = self.classify(error);
        let strategy = self.strategy_for(category, job_kind);
        let retry = strategy.permits(attempt);

        self.record(job_kind, error, category, attempt);

        debug!(
            job_kind = %job_kind,
            category = %category,
            decision = %strategy.decision,
            attempt = attempt,
            max_retries = strategy.max_retries,
            retry = retry,
            "Retry decision"
        );

        RetryVerdict {
            retry,
            category,
            strategy,
        }
    }

    pub fn delay(&self, strategy: &RetryStrategy, attempt: u32) -> Duration {
        strategy.delay(attempt)
    }

    fn record(&self, job_kind: &str, error: &StageError, category: ErrorCategory, attempt: u32) {
        let message: String = error.message.chars().take(limits::ERROR_MESSAGE_PREVIEW).collect();
        let mut history = self.history.lock();
        let entries = history.entry(job_kind.to_string()).or_default();
        entries.push_back(ErrorRecord {
            timestamp: Utc::now(),
            error_kind: error.kind.to_string(),
            category,
            message,
            attempt,
        });
        while entries.len() > self.history_size {
            entries.pop_front();
        }
    }

    /// Job kinds with recorded history
    pub fn known_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.history.lock().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn error_statistics(&self, job_kind: &str) -> ErrorStatistics {
        let history = self.history.lock();
        let entries = history.get(job_kind);

        let mut category_distribution = BTreeMap::new();
        let mut kind_distribution = BTreeMap::new();
        let mut recent_errors = Vec::new();

        if let Some(entries) = entries {
            for record in entries {
                *category_distribution
                    .entry(record.category.to_string())
                    .or_insert(0) += 1;
                *kind_distribution.entry(record.error_kind.clone()).or_insert(0) += 1;
            }
            recent_errors = entries
                .iter()
                .rev()
                .take(limits::RECENT_ERRORS)
                .cloned()
                .collect();
        }

        ErrorStatistics {
            job_kind: job_kind.to_string(),
            total_errors: entries.map_or(0, VecDeque::len),
            category_distribution,
            kind_distribution,
            recent_errors,
        }
    }

    /// Statistics plus remediation suggestions for the dominant categories
    pub fn analyze_errors(&self, job_kind: &str) -> ErrorAnalysis {
        let statistics = self.error_statistics(job_kind);

        let dominant_category = statistics
            .category_distribution
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .and_then(|(name, _)| name.parse::<ErrorCategory>().ok());

        let suggestions = if statistics.total_errors == 0 {
            vec!["No errors recorded".to_string()]
        } else {
            statistics
                .category_distribution
                .iter()
                .filter(|(_, count)| **count * 5 >= statistics.total_errors)
                .filter_map(|(name, _)| name.parse::<ErrorCategory>().ok())
                .map(|category| suggestion_for(category).to_string())
                .collect()
        };

        ErrorAnalysis {
            statistics,
            dominant_category,
            suggestions,
        }
    }
}

fn suggestion_for(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::NetworkError => {
            "Frequent network failures: check upstream reachability and connection pool limits"
        }
        ErrorCategory::ApiRateLimit => {
            "Upstream throttling: lower request concurrency or negotiate a higher quota"
        }
        ErrorCategory::DataError => {
            "Data errors: validate inputs at submission and review recent payload changes"
        }
        ErrorCategory::SystemError => {
            "System errors: check disk, memory and file descriptor headroom on workers"
        }
        ErrorCategory::TemporaryError => {
            "Transient failures: watch dependency health; retries are absorbing them"
        }
        ErrorCategory::PermanentError => {
            "Permanent failures: review business rules rejected by stage executors"
        }
    }
}
