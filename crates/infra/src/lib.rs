//! Infrastructure layer: stores, task execution, and the worker substrate.
//!
//! ## Flow
//!
//! 1. `TaskDispatcher::dispatch` validates a request (checking the problem and
//!    resolving the student through a `CourseDirectory`), records a queued
//!    `TaskEntry` in the `TaskStore`, and submits a body to a `TaskSubstrate`.
//! 2. A worker calls `TaskRunner::run`, which claims the entry, sizes the
//!    candidate set (`selector`), mutates each candidate (`mutator`), and
//!    publishes progress (`progress`) until the entry reaches a terminal state.
//! 3. Pollers read `TaskStatus` through the dispatcher at any time.

pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod executor;
pub mod modules;
pub mod mutator;
pub mod progress;
pub mod selector;
pub mod substrate;
pub mod tasks;


pub use config::ExecutorConfig;
pub use directory::{CourseDirectory, DirectoryError, InMemoryCourseDirectory, OpenDirectory};
pub use dispatcher::{DispatchError, TaskDispatcher, TaskRequest};
pub use executor::{ExecutionError, TaskRunner};
pub use mutator::{MutationError, MutationFailure, Mutator};
pub use progress::{ProgressError, ProgressTracker};
pub use selector::{Candidate, Selection, SelectionError, select};
pub use substrate::{InlineSubstrate, SubstrateError, TaskSubmission, TaskSubstrate, WorkerPool};
