//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic failures only: validation, illegal state transitions, bad ids.
/// Storage and runtime faults live in the infra error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A lifecycle transition is not allowed from the current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_pick_the_matching_variant() {
        assert_eq!(
            DomainError::validation("bad kind").to_string(),
            "validation failed: bad kind"
        );
        assert_eq!(
            DomainError::invalid_transition("finish applied twice"),
            DomainError::InvalidTransition("finish applied twice".to_string())
        );
        assert!(matches!(DomainError::invalid_id("TaskId: x"), DomainError::InvalidId(_)));
    }
}
