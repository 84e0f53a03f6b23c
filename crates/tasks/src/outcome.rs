//! Terminal outcome of a task: summary, failure samples, infrastructure cause.

use serde::{Deserialize, Serialize};

use coursetasks_core::StudentId;

/// One candidate that could not be mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub student: StudentId,
    /// Failure category (e.g. `instantiation`, `mutation`, `persistence`, `panic`).
    pub kind: String,
    pub cause: String,
}

/// Why a whole task could not run to completion.
///
/// Distinct from per-candidate failures, which are aggregated in [`TaskOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Error category, e.g. `selection_error` or `progress_flush_error`.
    pub kind: String,
    pub message: String,
}

impl TaskError {
    /// Build an error, truncating `message` to at most `max_len` characters.
    pub fn new(kind: impl Into<String>, message: impl AsRef<str>, max_len: usize) -> Self {
        Self {
            kind: kind.into(),
            message: truncate_chars(message.as_ref(), max_len),
        }
    }
}

/// Aggregated result recorded when a task reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub action_name: String,
    pub duration_ms: u64,
    /// Total number of failed candidates (may exceed `failures.len()`).
    pub failed_count: u64,
    /// Capped sample of per-candidate failures, in processing order.
    pub failures: Vec<FailureRecord>,
    pub error: Option<TaskError>,
}

impl TaskOutcome {
    pub fn completed(
        action_name: impl Into<String>,
        duration_ms: u64,
        failed_count: u64,
        failures: Vec<FailureRecord>,
    ) -> Self {
        Self {
            action_name: action_name.into(),
            duration_ms,
            failed_count,
            failures,
            error: None,
        }
    }

    pub fn aborted(action_name: impl Into<String>, duration_ms: u64, error: TaskError) -> Self {
        Self {
            action_name: action_name.into(),
            duration_ms,
            failed_count: 0,
            failures: Vec::new(),
            error: Some(error),
        }
    }
}

/// Truncate on a character boundary.
pub fn truncate_chars(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_messages_are_truncated() {
        let err = TaskError::new("progress_flush_error", "x".repeat(1500), 1000);
        assert_eq!(err.message.len(), 1000);
        assert_eq!(err.kind, "progress_flush_error");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 0), "");
    }
}
