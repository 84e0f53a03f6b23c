//! `coursetasks-tasks`
//!
//! **Responsibility:** the pure task model for bulk module-state mutations.
//!
//! - Mutation kinds and the content filter each kind selects with
//! - The task entry lifecycle (`Queued → InProgress → terminal`)
//! - Progress counters and the terminal outcome
//! - Poller-facing status and completion messages
//!
//! No IO here: stores, workers and collaborators live in `coursetasks-infra`.

pub mod entry;
pub mod kind;
pub mod outcome;
pub mod progress;
pub mod status;

pub use entry::{TaskEntry, TaskInput, TaskState};
pub use kind::{ContentFilter, FilterError, MutationKind};
pub use outcome::{FailureRecord, TaskError, TaskOutcome, truncate_chars};
pub use progress::{CandidateOutcome, ProgressSnapshot};
pub use status::{TaskStatus, completion_info};
