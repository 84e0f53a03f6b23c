//! `coursetasks-core`: shared identifiers and the domain error model.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod refs;

pub use error::{DomainError, DomainResult};
pub use id::{TaskId, UserId};
pub use refs::{CourseId, MAX_PROBLEM_URL_LEN, ProblemUrl, StudentId};
