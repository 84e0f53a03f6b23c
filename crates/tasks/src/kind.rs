//! Mutation kinds and the content filter each kind selects with.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use coursetasks_core::DomainError;

/// The closed set of bulk mutations a task can perform on module state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Recompute the score from the already-submitted answers.
    Rescore,
    /// Set the attempt counter back to zero.
    ResetAttempts,
    /// Remove the student's module state entirely.
    DeleteState,
}

impl MutationKind {
    pub const ALL: [MutationKind; 3] = [
        MutationKind::Rescore,
        MutationKind::ResetAttempts,
        MutationKind::DeleteState,
    ];

    /// Wire name, as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Rescore => "rescore",
            MutationKind::ResetAttempts => "reset_attempts",
            MutationKind::DeleteState => "delete_state",
        }
    }

    /// Past-tense verb used in progress reports ("rescored 4 of 5").
    pub fn action_name(&self) -> &'static str {
        match self {
            MutationKind::Rescore => "rescored",
            MutationKind::ResetAttempts => "reset",
            MutationKind::DeleteState => "deleted",
        }
    }

    /// Filter applied when selecting candidates for this kind.
    ///
    /// Rescoring only makes sense for submitted attempts; the other kinds apply to
    /// every record.
    pub fn candidate_filter(&self) -> Option<ContentFilter> {
        match self {
            MutationKind::Rescore => Some(ContentFilter::SubmissionComplete),
            MutationKind::ResetAttempts | MutationKind::DeleteState => None,
        }
    }
}

impl core::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rescore" => Ok(MutationKind::Rescore),
            "reset_attempts" | "reset-attempts" => Ok(MutationKind::ResetAttempts),
            "delete_state" | "delete-state" => Ok(MutationKind::DeleteState),
            other => Err(DomainError::validation(format!(
                "unknown mutation kind '{other}' (expected one of: rescore, reset_attempts, delete_state)"
            ))),
        }
    }
}

/// Content-based predicate over a module state blob.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFilter {
    /// Only states recording a finished submission (`"done": true`).
    SubmissionComplete,
}

/// The state blob could not be evaluated by a filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("state is not valid JSON: {0}")]
    Malformed(String),

    #[error("state is not a JSON object")]
    NotAnObject,
}

impl ContentFilter {
    /// Evaluate the filter against a raw state blob.
    ///
    /// Missing or empty state never matches. Pure: no side effects, no IO.
    pub fn evaluate(&self, state: Option<&str>) -> Result<bool, FilterError> {
        let raw = match state.map(str::trim) {
            None | Some("") | Some("null") => return Ok(false),
            Some(raw) => raw,
        };

        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| FilterError::Malformed(e.to_string()))?;
        let object = value.as_object().ok_or(FilterError::NotAnObject)?;

        match self {
            ContentFilter::SubmissionComplete => {
                Ok(object.get("done").and_then(serde_json::Value::as_bool) == Some(true))
            }
        }
    }
}
