//! Runs one task from claim to terminal state.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use coursetasks_core::{DomainError, TaskId};
use coursetasks_tasks::{TaskEntry, TaskError, TaskOutcome, TaskState};

use crate::config::ExecutorConfig;
use crate::modules::{ModuleInstantiator, ModuleStateQuery, ModuleStateStore};
use crate::mutator::Mutator;
use crate::progress::ProgressTracker;
use crate::selector::{Candidate, select};
use crate::tasks::{TaskStore, TaskStoreError};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The entry was not queued: another worker owns it or it already ran.
    #[error("task {task_id} cannot be claimed: {reason}")]
    AlreadyClaimed { task_id: TaskId, reason: DomainError },
    #[error(transparent)]
    Store(#[from] TaskStoreError),
}

/// Executes task entries against module state.
pub struct TaskRunner<T, M, I> {
    tasks: T,
    modules: M,
    instantiator: I,
    config: ExecutorConfig,
}

impl<T, M, I> TaskRunner<T, M, I>
where
    T: TaskStore,
    M: ModuleStateStore,
    I: ModuleInstantiator,
{
    pub fn new(tasks: T, modules: M, instantiator: I, config: ExecutorConfig) -> Self {
        Self {
            tasks,
            modules,
            instantiator,
            config,
        }
    }

    pub fn tasks(&self) -> &T {
        &self.tasks
    }

    pub fn modules(&self) -> &M {
        &self.modules
    }

    pub fn instantiator(&self) -> &I {
        &self.instantiator
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run a queued task to a terminal state.
    ///
    /// Returns the terminal state, including `Failed` for runs aborted by a
    /// selection or progress fault. Errors mean the entry could not be claimed
    /// or its terminal state could not be written.
    pub fn run(&self, task_id: TaskId) -> Result<TaskState, ExecutionError> {
        let started = Instant::now();

        let entry = match self.tasks.claim(task_id) {
            Ok(entry) => entry,
            Err(TaskStoreError::Transition(reason)) => {
                warn!(task_id = %task_id, reason = %reason, "refusing to run task twice");
                return Err(ExecutionError::AlreadyClaimed { task_id, reason });
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            task_id = %task_id,
            kind = %entry.kind,
            course_id = %entry.course_id,
            problem_url = %entry.input.problem_url,
            student = ?entry.input.student.as_ref().map(|s| s.as_str()),
            "task started"
        );

        let query = ModuleStateQuery {
            course_id: entry.course_id.clone(),
            problem_url: entry.input.problem_url.clone(),
            student: entry.input.student.clone(),
        };
        let selection = match select(&self.modules, query, entry.filter, self.config.page_size) {
            Ok(selection) => selection,
            Err(e) => return self.abort(&entry, "selection_error", e.to_string(), started),
        };
        debug!(task_id = %task_id, total = selection.total, "candidates selected");

        if let Some(student) = &entry.input.student {
            if selection.total == 0 {
                let message = format!(
                    "Unable to find submission to be {} for student '{student}'",
                    entry.kind.action_name()
                );
                return self.abort(&entry, "student_not_found", message, started);
            }
        }

        let tracker = match ProgressTracker::start(&self.tasks, task_id, selection.total, &self.config) {
            Ok(tracker) => tracker,
            Err(e) => return self.abort(&entry, "progress_flush_error", e.to_string(), started),
        };
        let mutator = Mutator::new(&self.modules, &self.instantiator);

        for candidate in selection.candidates {
            let recorded = match candidate {
                Err(e) => return self.abort(&entry, "selection_error", e.to_string(), started),
                Ok(Candidate::Unreadable { record, reason }) => {
                    debug!(task_id = %task_id, student = %record.student, reason = %reason, "skipping unreadable state");
                    tracker.record_skip()
                }
                Ok(Candidate::Eligible(record)) => match mutator.mutate(entry.kind, &record) {
                    Ok(()) => tracker.record_success(),
                    Err(failure) => {
                        warn!(
                            task_id = %task_id,
                            student = %failure.student,
                            failure_kind = failure.cause.kind(),
                            error = %failure.cause,
                            "candidate mutation failed"
                        );
                        tracker.record_failure(failure.to_record(self.config.max_message_len))
                    }
                },
            };
            if let Err(e) = recorded {
                return self.abort(&entry, "progress_flush_error", e.to_string(), started);
            }
        }

        let (mut progress, failures) = match tracker.finish() {
            Ok(finished) => finished,
            Err(e) => return self.abort(&entry, "progress_flush_error", e.to_string(), started),
        };
        if !progress.is_complete() {
            warn!(
                task_id = %task_id,
                total = ?progress.total_candidates,
                attempted = progress.attempted,
                "candidate set shrank during the run"
            );
            progress.total_candidates = Some(progress.attempted);
        }

        let outcome = TaskOutcome::completed(
            entry.kind.action_name(),
            elapsed_ms(started),
            progress.failed,
            failures,
        );
        let state = match self.tasks.finish(task_id, progress, outcome) {
            Ok(state) => state,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "failed to commit task outcome");
                return self.abort(&entry, "progress_flush_error", e.to_string(), started);
            }
        };

        info!(
            task_id = %task_id,
            state = %state,
            attempted = progress.attempted,
            succeeded = progress.succeeded,
            skipped = progress.skipped,
            failed = progress.failed,
            duration_ms = elapsed_ms(started),
            "task finished"
        );
        Ok(state)
    }

    fn abort(
        &self,
        entry: &TaskEntry,
        kind: &str,
        message: String,
        started: Instant,
    ) -> Result<TaskState, ExecutionError> {
        let error = TaskError::new(kind, &message, self.config.max_message_len);
        warn!(task_id = %entry.id, error_kind = kind, error = %error.message, "task failed");
        self.tasks.fail(entry.id, error, elapsed_ms(started))?;
        Ok(TaskState::Failed)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{InMemoryModuleStateStore, JsonStateInstantiator};
    use crate::tasks::InMemoryTaskStore;
    use coursetasks_core::{CourseId, ProblemUrl, StudentId, UserId};
    use coursetasks_tasks::{MutationKind, TaskInput};
    use std::sync::Arc;

    type Runner = TaskRunner<
        Arc<InMemoryTaskStore>,
        Arc<InMemoryModuleStateStore>,
        JsonStateInstantiator<Arc<InMemoryModuleStateStore>>,
    >;

    fn runner() -> Runner {
        let modules = InMemoryModuleStateStore::arc();
        TaskRunner::new(
            InMemoryTaskStore::arc(),
            modules.clone(),
            JsonStateInstantiator::new(modules),
            ExecutorConfig::default(),
        )
    }

    fn queue(runner: &Runner, kind: MutationKind, student: Option<&str>) -> TaskId {
        let entry = TaskEntry::new(
            CourseId::new("edx/1.23x/test_course").unwrap(),
            kind,
            TaskInput {
                problem_url: ProblemUrl::new("i4x://edx/1.23x/problem/H1P1").unwrap(),
                student: student.map(|s| StudentId::new(s).unwrap()),
            },
            UserId::new(),
        );
        runner.tasks().create(entry).unwrap()
    }

    #[test]
    fn unknown_task_is_a_store_error() {
        let err = runner().run(TaskId::new()).unwrap_err();
        assert!(matches!(err, ExecutionError::Store(TaskStoreError::NotFound(_))));
    }

    #[test]
    fn second_run_of_same_task_is_refused() {
        let runner = runner();
        let id = queue(&runner, MutationKind::DeleteState, None);

        assert_eq!(runner.run(id).unwrap(), TaskState::Succeeded);
        let finished = runner.tasks().get(id).unwrap().unwrap();

        let err = runner.run(id).unwrap_err();
        assert!(matches!(err, ExecutionError::AlreadyClaimed { .. }));
        assert_eq!(runner.tasks().get(id).unwrap().unwrap(), finished);
    }

    #[test]
    fn missing_single_student_fails_with_not_found() {
        let runner = runner();
        let id = queue(&runner, MutationKind::ResetAttempts, Some("nobody"));

        assert_eq!(runner.run(id).unwrap(), TaskState::Failed);
        let entry = runner.tasks().get(id).unwrap().unwrap();
        let error = entry.error().unwrap();
        assert_eq!(error.kind, "student_not_found");
        assert_eq!(error.message, "Unable to find submission to be reset for student 'nobody'");
        assert_eq!(entry.progress.attempted, 0);
    }
}
