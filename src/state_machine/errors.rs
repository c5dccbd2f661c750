use thiserror::Error;

/// Errors raised while computing or checking a transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: Option<String>, to: String },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
