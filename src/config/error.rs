//! Configuration Error Types

use thiserror::Error;

/// Configuration-related errors with enough context to act on
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The layered sources could not be read or merged
    #[error("Failed to load configuration from {source_name}: {error}")]
    LoadError { source_name: String, error: String },

    /// A value failed validation
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Two settings contradict each other
    #[error("Inconsistent configuration between '{first}' and '{second}': {context}")]
    Inconsistent {
        first: String,
        second: String,
        context: String,
    },
}

impl ConfigurationError {
    pub fn load_error<S: Into<String>, E: std::fmt::Display>(source_name: S, error: E) -> Self {
        Self::LoadError {
            source_name: source_name.into(),
            error: error.to_string(),
        }
    }

    pub fn invalid_value<F: Into<String>, V: ToString, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    pub fn inconsistent<A: Into<String>, B: Into<String>, C: Into<String>>(
        first: A,
        second: B,
        context: C,
    ) -> Self {
        Self::Inconsistent {
            first: first.into(),
            second: second.into(),
            context: context.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
