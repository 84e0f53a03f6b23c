//! Validated references to course content and students.
//!
//! These are plain string keys owned by other subsystems (course catalog, content
//! store, user accounts). The task subsystem never interprets them beyond
//! validation and equality.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Longest problem url the task table can index.
pub const MAX_PROBLEM_URL_LEN: usize = 255;

/// Course identifier, e.g. `edx/1.23x/test_course`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CourseId(String);

/// Location of a problem inside a course, e.g. `i4x://edx/1.23x/problem/H1P1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProblemUrl(String);

/// Student identifier (username) as known to the module state store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudentId(String);

fn require_key(kind: &str, value: &str) -> DomainResult<()> {
    if value.is_empty() {
        return Err(DomainError::validation(format!("{kind} must not be empty")));
    }
    if value.trim() != value || value.chars().any(char::is_control) {
        return Err(DomainError::validation(format!(
            "{kind} must not contain surrounding whitespace or control characters"
        )));
    }
    Ok(())
}

impl CourseId {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        require_key("course id", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ProblemUrl {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        require_key("problem url", &value)?;
        if value.chars().count() > MAX_PROBLEM_URL_LEN {
            return Err(DomainError::validation(format!(
                "problem url exceeds {MAX_PROBLEM_URL_LEN} characters"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl StudentId {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        require_key("student id", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_string_key {
    ($t:ty) => {
        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl core::str::FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

impl_string_key!(CourseId);
impl_string_key!(ProblemUrl);
impl_string_key!(StudentId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_url_length_is_bounded() {
        let ok = format!("i4x://edx/1.23x/problem/{}", "x".repeat(200));
        assert!(ProblemUrl::new(ok).is_ok());

        let long = format!("i4x://edx/1.23x/problem/{}", "x".repeat(255));
        let err = ProblemUrl::new(long).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("255")));
    }

    #[test]
    fn empty_and_padded_keys_are_rejected() {
        assert!(CourseId::new("").is_err());
        assert!(StudentId::new(" robot1").is_err());
        assert!(ProblemUrl::new("i4x://a\n").is_err());
    }

    #[test]
    fn deserialize_validates() {
        let ok: CourseId = serde_json::from_str("\"edx/1.23x/test_course\"").unwrap();
        assert_eq!(ok.as_str(), "edx/1.23x/test_course");
        assert!(serde_json::from_str::<StudentId>("\"\"").is_err());
    }
}
