//! # Stage Error Classification
//!
//! Maps a stage failure to one of six [`ErrorCategory`] values that drive the retry
//! decision.
//!
//! ## Rule order
//!
//! Classification is a fixed, ordered rule table:
//!
//! 1. **Status code**: transport errors carrying an HTTP-style status are classified by
//!    code (429 rate limit, other 4xx data, 5xx temporary).
//! 2. **Error kind**: otherwise the kind is looked up in a static table; unknown kinds
//!    walk their [`ErrorKind::parent`] chain and fall back to `TemporaryError`.
//! 3. **Message keywords**: the lower-cased message is scanned for keyword groups in
//!    priority order (rate limit, connectivity, malformed data). A keyword hit overrides
//!    the result of steps 1 and 2.
//!
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌──────────────┐    ┌───────────────┐
//! │ StageError  │───▶│ status code  │───▶│ kind / parent│───▶│ keyword       │───▶ ErrorCategory
//! │ kind+msg+sc │    │ (if present) │    │ (otherwise)  │    │ override      │
//! └─────────────┘    └──────────────┘    └──────────────┘    └───────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use stagehand::orchestration::{
//!     ErrorCategory, ErrorClassifier, ErrorKind, StageError, StandardErrorClassifier,
//! };
//!
//! let classifier = StandardErrorClassifier::new();
//! let error = StageError::new(ErrorKind::Other, "connection timeout");
//! assert_eq!(classifier.classify(&error), ErrorCategory::NetworkError);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::state_machine::Stage;

/// Stage-level error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connectivity problems; fast retry
    NetworkError,
    /// Upstream throttling; long fixed delay
    ApiRateLimit,
    /// Malformed or invalid input; never retried
    DataError,
    /// Local resource or permission problems
    SystemError,
    /// Transient upstream or infrastructure failure
    TemporaryError,
    /// Structural failure; never retried
    PermanentError,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 6] = [
        Self::NetworkError,
        Self::ApiRateLimit,
        Self::DataError,
        Self::SystemError,
        Self::TemporaryError,
        Self::PermanentError,
    ];
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkError => write!(f, "network_error"),
            Self::ApiRateLimit => write!(f, "api_rate_limit"),
            Self::DataError => write!(f, "data_error"),
            Self::SystemError => write!(f, "system_error"),
            Self::TemporaryError => write!(f, "temporary_error"),
            Self::PermanentError => write!(f, "permanent_error"),
        }
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network_error" => Ok(Self::NetworkError),
            "api_rate_limit" => Ok(Self::ApiRateLimit),
            "data_error" => Ok(Self::DataError),
            "system_error" => Ok(Self::SystemError),
            "temporary_error" => Ok(Self::TemporaryError),
            "permanent_error" => Ok(Self::PermanentError),
            _ => Err(format!("Invalid error category: {s}")),
        }
    }
}

/// Concrete failure kinds a stage executor can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    ConnectTimeout,
    ReadTimeout,
    Timeout,
    Tls,
    Http,
    Request,
    Database,
    Io,
    /// The stage exceeded its time budget
    StageTimeout,
    FileNotFound,
    InvalidValue,
    Parse,
    Decode,
    TypeMismatch,
    MissingKey,
    Permission,
    ResourceExhausted,
    OutOfMemory,
    System,
    /// Business rule rejection raised by the executor
    Domain,
    Unsupported,
    Other,
}

impl ErrorKind {
    /// More general kind consulted when this one has no table entry
    pub fn parent(&self) -> Option<ErrorKind> {
        match self {
            Self::Tls => Some(Self::Connection),
            Self::Parse => Some(Self::InvalidValue),
            Self::Decode => Some(Self::Parse),
            Self::OutOfMemory => Some(Self::ResourceExhausted),
            Self::Unsupported => Some(Self::Domain),
            _ => None,
        }
    }

    /// Static kind table
    fn table_category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Connection | Self::ConnectTimeout | Self::ReadTimeout | Self::Timeout => {
                Some(ErrorCategory::NetworkError)
            }
            Self::Http | Self::Request | Self::Database | Self::Io | Self::StageTimeout => {
                Some(ErrorCategory::TemporaryError)
            }
            Self::FileNotFound | Self::InvalidValue | Self::TypeMismatch | Self::MissingKey => {
                Some(ErrorCategory::DataError)
            }
            Self::Permission | Self::ResourceExhausted | Self::System => {
                Some(ErrorCategory::SystemError)
            }
            Self::Domain => Some(ErrorCategory::PermanentError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{self:?}"));
        write!(f, "{name}")
    }
}

/// Failure reported by a stage executor. Plain data: it never propagates out of the
/// orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
    /// Status code for transport-style errors
    pub status_code: Option<u16>,
}

impl StageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn http(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Http,
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Budget exhaustion. The message deliberately avoids the connectivity keywords so
    /// the kind table (temporary) decides.
    pub fn stage_timeout(stage: Stage, budget: Duration) -> Self {
        Self::new(
            ErrorKind::StageTimeout,
            format!(
                "{stage} stage exceeded its {}s execution budget",
                budget.as_secs()
            ),
        )
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} ({}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for StageError {}

/// Keyword groups in priority order
const KEYWORD_RULES: [(ErrorCategory, &[&str]); 3] = [
    (
        ErrorCategory::ApiRateLimit,
        &["rate limit", "too many requests", "quota exceeded"],
    ),
    (ErrorCategory::NetworkError, &["connection", "network", "timeout"]),
    (ErrorCategory::DataError, &["invalid", "malformed", "corrupt"]),
];

pub trait ErrorClassifier: Send + Sync {
    /// Full layered classification
    fn classify(&self, error: &StageError) -> ErrorCategory;

    /// Keyword rules alone; `None` when no group matches
    fn classify_message(&self, message: &str) -> Option<ErrorCategory>;

    fn classifier_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct StandardErrorClassifier;

impl StandardErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    fn classify_status(code: u16) -> Option<ErrorCategory> {
        match code {
            429 => Some(ErrorCategory::ApiRateLimit),
            400..=499 => Some(ErrorCategory::DataError),
            500..=599 => Some(ErrorCategory::TemporaryError),
            _ => None,
        }
    }

    fn classify_kind(kind: ErrorKind) -> ErrorCategory {
        let mut current = Some(kind);
        while let Some(k) = current {
            if let Some(category) = k.table_category() {
                return category;
            }
            current = k.parent();
        }
        ErrorCategory::TemporaryError
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify(&self, error: &StageError) -> ErrorCategory {
        let structural = error
            .status_code
            .and_then(Self::classify_status)
            .unwrap_or_else(|| Self::classify_kind(error.kind));

        self.classify_message(&error.message).unwrap_or(structural)
    }

    fn classify_message(&self, message: &str) -> Option<ErrorCategory> {
        let lowered = message.to_lowercase();
        KEYWORD_RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|kw| lowered.contains(kw)))
            .map(|(category, _)| *category)
    }

    fn classifier_name(&self) -> &'static str {
        "standard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(kind: ErrorKind, message: &str) -> ErrorCategory {
        StandardErrorClassifier::new().classify(&StageError::new(kind, message))
    }

    #[test]
    fn test_kind_table() {
        assert_eq!(classify(ErrorKind::Connection, "refused"), ErrorCategory::NetworkError);
        assert_eq!(classify(ErrorKind::Database, "deadlock"), ErrorCategory::TemporaryError);
        assert_eq!(classify(ErrorKind::MissingKey, "no field 'sku'"), ErrorCategory::DataError);
        assert_eq!(classify(ErrorKind::Permission, "denied"), ErrorCategory::SystemError);
        assert_eq!(classify(ErrorKind::Domain, "unsupported carrier"), ErrorCategory::PermanentError);
    }

    #[test]
    fn test_parent_walk_and_default() {
        assert_eq!(classify(ErrorKind::Decode, "bad utf-8"), ErrorCategory::DataError);
        assert_eq!(classify(ErrorKind::Tls, "handshake"), ErrorCategory::NetworkError);
        assert_eq!(classify(ErrorKind::OutOfMemory, "oom"), ErrorCategory::SystemError);
        assert_eq!(classify(ErrorKind::Other, "something odd"), ErrorCategory::TemporaryError);
    }

    #[test]
    fn test_keywords_override_kind() {
        assert_eq!(classify(ErrorKind::Other, "connection timeout"), ErrorCategory::NetworkError);
        assert_eq!(classify(ErrorKind::Database, "Invalid data format"), ErrorCategory::DataError);
        assert_eq!(
            classify(ErrorKind::Connection, "Too Many Requests from upstream"),
            ErrorCategory::ApiRateLimit
        );
    }

    #[test]
    fn test_keyword_group_priority() {
        // rate limit beats connectivity, connectivity beats data
        assert_eq!(
            classify(ErrorKind::Other, "rate limit hit, connection closed"),
            ErrorCategory::ApiRateLimit
        );
        assert_eq!(
            classify(ErrorKind::Other, "invalid response on connection"),
            ErrorCategory::NetworkError
        );
    }

    #[test]
    fn test_status_codes() {
        let classifier = StandardErrorClassifier::new();
        assert_eq!(
            classifier.classify(&StageError::http(429, "slow down")),
            ErrorCategory::ApiRateLimit
        );
        assert_eq!(
            classifier.classify(&StageError::http(404, "no such parcel")),
            ErrorCategory::DataError
        );
        assert_eq!(
            classifier.classify(&StageError::http(503, "unavailable")),
            ErrorCategory::TemporaryError
        );
        assert_eq!(
            classifier.classify(&StageError::http(502, "bad gateway")),
            ErrorCategory::TemporaryError
        );
        // keywords still win over the code
        assert_eq!(
            classifier.classify(&StageError::http(500, "upstream connection reset")),
            ErrorCategory::NetworkError
        );
    }

    #[test]
    fn test_stage_timeout_is_temporary() {
        let err = StageError::stage_timeout(Stage::Lookup, Duration::from_secs(30));
        assert_eq!(
            StandardErrorClassifier::new().classify(&err),
            ErrorCategory::TemporaryError
        );
    }

    #[test]
    fn test_classify_message_without_keywords() {
        assert_eq!(
            StandardErrorClassifier::new().classify_message("mysterious error"),
            None
        );
    }

    #[test]
    fn test_category_round_trip() {
        use std::str::FromStr;
        for category in ErrorCategory::ALL {
            assert_eq!(ErrorCategory::from_str(&category.to_string()).unwrap(), category);
        }
    }
}
