//! # Failure Analysis
//!
//! Decides what to do with a job that reached `Failed`: recover it automatically,
//! escalate it to an operator or the owner, or leave it for manual review.
//!
//! Analysis scans the stored error message against ordered pattern groups. A pattern
//! is a sequence of tokens separated by `.*`; it matches when every token occurs in
//! the lower-cased message in order (`connection.*timeout` matches
//! "Connection to upstream: timeout after 30s"). The first matching pattern wins
//! with high confidence. Without a match the stage classifier's keyword rules are
//! consulted (medium confidence), and everything else is `Unknown`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::models::Job;
use crate::orchestration::{ErrorCategory, ErrorClassifier, StandardErrorClassifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    RecoverableNetwork,
    RecoverableSystem,
    RecoverableTemporary,
    UnrecoverableData,
    UnrecoverableConfig,
    UnrecoverableBusiness,
    Unknown,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 7] = [
        Self::RecoverableNetwork,
        Self::RecoverableSystem,
        Self::RecoverableTemporary,
        Self::UnrecoverableData,
        Self::UnrecoverableConfig,
        Self::UnrecoverableBusiness,
        Self::Unknown,
    ];

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RecoverableNetwork | Self::RecoverableSystem | Self::RecoverableTemporary
        )
    }

    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            Self::UnrecoverableData | Self::UnrecoverableConfig | Self::UnrecoverableBusiness
        )
    }

    pub fn recommended_action(&self) -> RecommendedAction {
        match self {
            Self::RecoverableNetwork => RecommendedAction::AutoRetryWithDelay,
            Self::RecoverableSystem => RecommendedAction::AutoRetryWithBackoff,
            Self::RecoverableTemporary => RecommendedAction::AutoRetryProgressive,
            Self::UnrecoverableData => RecommendedAction::NotifyAdminDataIssue,
            Self::UnrecoverableConfig => RecommendedAction::NotifyAdminConfigIssue,
            Self::UnrecoverableBusiness => RecommendedAction::NotifyUserBusinessIssue,
            Self::Unknown => RecommendedAction::ManualReview,
        }
    }

    /// Recovery strategy label recorded with a re-injection
    pub fn recovery_strategy(&self) -> Option<&'static str> {
        match self {
            Self::RecoverableNetwork => Some("immediate_retry"),
            Self::RecoverableSystem => Some("delayed_retry"),
            Self::RecoverableTemporary => Some("progressive_retry"),
            _ => None,
        }
    }

    /// Closest terminal category for a stage-level category
    pub fn from_error_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::NetworkError => Self::RecoverableNetwork,
            ErrorCategory::ApiRateLimit | ErrorCategory::TemporaryError => Self::RecoverableTemporary,
            ErrorCategory::SystemError => Self::RecoverableSystem,
            ErrorCategory::DataError => Self::UnrecoverableData,
            ErrorCategory::PermanentError => Self::UnrecoverableBusiness,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RecoverableNetwork => "recoverable_network",
            Self::RecoverableSystem => "recoverable_system",
            Self::RecoverableTemporary => "recoverable_temporary",
            Self::UnrecoverableData => "unrecoverable_data",
            Self::UnrecoverableConfig => "unrecoverable_config",
            Self::UnrecoverableBusiness => "unrecoverable_business",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for FailureCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recoverable_network" => Ok(Self::RecoverableNetwork),
            "recoverable_system" => Ok(Self::RecoverableSystem),
            "recoverable_temporary" => Ok(Self::RecoverableTemporary),
            "unrecoverable_data" => Ok(Self::UnrecoverableData),
            "unrecoverable_config" => Ok(Self::UnrecoverableConfig),
            "unrecoverable_business" => Ok(Self::UnrecoverableBusiness),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid failure category: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    AutoRetryWithDelay,
    AutoRetryWithBackoff,
    AutoRetryProgressive,
    NotifyAdminDataIssue,
    NotifyAdminConfigIssue,
    NotifyUserBusinessIssue,
    ManualReview,
}

impl RecommendedAction {
    /// Whether the escalation goes to the operator channel
    pub fn targets_admin(&self) -> bool {
        matches!(self, Self::NotifyAdminDataIssue | Self::NotifyAdminConfigIssue)
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AutoRetryWithDelay => "auto_retry_with_delay",
            Self::AutoRetryWithBackoff => "auto_retry_with_backoff",
            Self::AutoRetryProgressive => "auto_retry_progressive",
            Self::NotifyAdminDataIssue => "notify_admin_data_issue",
            Self::NotifyAdminConfigIssue => "notify_admin_config_issue",
            Self::NotifyUserBusinessIssue => "notify_user_business_issue",
            Self::ManualReview => "manual_review",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub category: FailureCategory,
    pub action: RecommendedAction,
    pub confidence: Confidence,
    pub matched_pattern: Option<String>,
    pub retryable: bool,
    pub details: serde_json::Value,
}

impl FailureAnalysis {
    fn new(category: FailureCategory, confidence: Confidence, matched_pattern: Option<&str>) -> Self {
        Self {
            category,
            action: category.recommended_action(),
            confidence,
            matched_pattern: matched_pattern.map(str::to_string),
            retryable: category.is_recoverable(),
            details: serde_json::Value::Null,
        }
    }
}

const NETWORK_PATTERNS: &[&str] = &[
    "connection.*timeout",
    "network.*unreachable",
    "connection.*refused",
    "dns.*resolution.*failed",
    "socket.*timeout",
    "read.*timeout",
    "connect.*timeout",
    "http.*timeout",
    "request.*timeout",
    "connection.*reset",
    "temporary.*failure.*in.*name.*resolution",
];

const SYSTEM_PATTERNS: &[&str] = &[
    "memory.*error",
    "disk.*space",
    "no.*space.*left",
    "resource.*temporarily.*unavailable",
    "too.*many.*open.*files",
    "permission.*denied",
    "device.*or.*resource.*busy",
    "cannot.*allocate.*memory",
    "system.*overloaded",
];

const TEMPORARY_PATTERNS: &[&str] = &[
    "database.*connection.*failed",
    "deadlock.*detected",
    "lock.*wait.*timeout",
    "server.*temporarily.*unavailable",
    "service.*unavailable",
    "internal.*server.*error",
    "bad.*gateway",
    "gateway.*timeout",
    "too.*many.*requests",
    "rate.*limit.*exceeded",
    "quota.*exceeded",
    "temporarily.*overloaded",
];

const DATA_PATTERNS: &[&str] = &[
    "invalid.*data.*format",
    "malformed.*json",
    "parse.*error",
    "validation.*failed",
    "constraint.*violation",
    "foreign.*key.*constraint",
    "duplicate.*key",
    "null.*value.*in.*column",
    "data.*type.*mismatch",
    "invalid.*input.*syntax",
    "value.*out.*of.*range",
    "division.*by.*zero",
];

const CONFIG_PATTERNS: &[&str] = &[
    "configuration.*error",
    "missing.*required.*parameter",
    "invalid.*configuration",
    "authentication.*failed",
    "unauthorized.*access",
    "forbidden.*access",
    "api.*key.*invalid",
    "certificate.*error",
    "ssl.*error",
    "missing.*environment.*variable",
];

const BUSINESS_PATTERNS: &[&str] = &[
    "business.*rule.*violation",
    "workflow.*state.*error",
    "invalid.*operation",
    "operation.*not.*allowed",
    "resource.*not.*found",
    "file.*not.*found",
    "tracking.*number.*invalid",
    "courier.*company.*not.*supported",
    "template.*not.*found",
];

/// Ordered token-sequence pattern
#[derive(Debug, Clone)]
struct Pattern {
    source: &'static str,
    tokens: Vec<&'static str>,
}

impl Pattern {
    fn new(source: &'static str) -> Self {
        Self {
            source,
            tokens: source.split(".*").filter(|t| !t.is_empty()).collect(),
        }
    }

    /// `lowered` must already be lower-cased
    fn matches(&self, lowered: &str) -> bool {
        let mut rest = lowered;
        for token in &self.tokens {
            match rest.find(token) {
                Some(at) => rest = &rest[at + token.len()..],
                None => return false,
            }
        }
        true
    }
}

pub struct FailureAnalyzer {
    classifier: Arc<dyn ErrorClassifier>,
    groups: Vec<(FailureCategory, Vec<Pattern>)>,
}

impl fmt::Debug for FailureAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureAnalyzer")
            .field("classifier", &self.classifier.classifier_name())
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl Default for FailureAnalyzer {
    fn default() -> Self {
        Self::new(Arc::new(StandardErrorClassifier::new()))
    }
}

impl FailureAnalyzer {
    pub fn new(classifier: Arc<dyn ErrorClassifier>) -> Self {
        let group = |category, patterns: &[&'static str]| {
            (category, patterns.iter().copied().map(Pattern::new).collect())
        };
        Self {
            classifier,
            groups: vec![
                group(FailureCategory::RecoverableNetwork, NETWORK_PATTERNS),
                group(FailureCategory::RecoverableSystem, SYSTEM_PATTERNS),
                group(FailureCategory::RecoverableTemporary, TEMPORARY_PATTERNS),
                group(FailureCategory::UnrecoverableData, DATA_PATTERNS),
                group(FailureCategory::UnrecoverableConfig, CONFIG_PATTERNS),
                group(FailureCategory::UnrecoverableBusiness, BUSINESS_PATTERNS),
            ],
        }
    }

    pub fn analyze(&self, job: &Job) -> FailureAnalysis {
        let mut analysis =
            self.analyze_message(job.error_message.as_deref().unwrap_or(""), job.error_category);
        analysis.details = serde_json::json!({
            "job_id": job.id,
            "job_kind": job.job_kind,
            "error_message": job.error_message,
            "error_category": job.error_category,
            "failed_at": job.updated_at,
            "retry_count": job.retry_count,
            "recovery_attempts": job.recovery_attempts,
        });
        analysis
    }

    /// Analyze a bare message. `error_category` is the stage-level category recorded
    /// when the job failed, if any.
    pub fn analyze_message(&self, message: &str, error_category: Option<ErrorCategory>) -> FailureAnalysis {
        if message.trim().is_empty() {
            return FailureAnalysis::new(FailureCategory::Unknown, Confidence::Low, None);
        }

        let lowered = message.to_lowercase();
        let analysis = self
            .groups
            .iter()
            .find_map(|(category, patterns)| {
                patterns
                    .iter()
                    .find(|p| p.matches(&lowered))
                    .map(|p| FailureAnalysis::new(*category, Confidence::High, Some(p.source)))
            })
            .or_else(|| {
                self.classifier.classify_message(message).map(|c| {
                    FailureAnalysis::new(FailureCategory::from_error_category(c), Confidence::Medium, None)
                })
            })
            .unwrap_or_else(|| FailureAnalysis::new(FailureCategory::Unknown, Confidence::Low, None));

        // Structural failures are never auto-recovered, whatever the wording
        let forced = match error_category {
            Some(ErrorCategory::DataError) => Some(FailureCategory::UnrecoverableData),
            Some(ErrorCategory::PermanentError) => Some(FailureCategory::UnrecoverableBusiness),
            _ => None,
        };
        match forced {
            Some(category) if !analysis.category.is_unrecoverable() => FailureAnalysis {
                category,
                action: category.recommended_action(),
                retryable: false,
                confidence: Confidence::Medium,
                ..analysis
            },
            _ => analysis,
        }
    }
}
