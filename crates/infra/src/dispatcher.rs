//! Task submission and status queries.

use std::sync::Arc;

use tracing::{error, info};

use coursetasks_core::{CourseId, DomainError, ProblemUrl, StudentId, TaskId, UserId};
use coursetasks_tasks::{MutationKind, TaskEntry, TaskError, TaskInput, TaskStatus};

use crate::directory::{CourseDirectory, DirectoryError, OpenDirectory};
use crate::executor::TaskRunner;
use crate::modules::{ModuleInstantiator, ModuleStateStore};
use crate::substrate::{SubstrateError, TaskSubmission, TaskSubstrate};
use crate::tasks::{TaskStore, TaskStoreError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    Validation(#[from] DomainError),
    #[error("task {task_id} is already running for key '{task_key}'")]
    AlreadyRunning { task_id: TaskId, task_key: String },
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task store error: {0}")]
    Store(TaskStoreError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("failed to submit task {task_id}: {source}")]
    Submit {
        task_id: TaskId,
        #[source]
        source: SubstrateError,
    },
}

impl From<TaskStoreError> for DispatchError {
    fn from(err: TaskStoreError) -> Self {
        match err {
            TaskStoreError::AlreadyRunning { task_id, task_key } => {
                DispatchError::AlreadyRunning { task_id, task_key }
            }
            TaskStoreError::NotFound(task_id) => DispatchError::NotFound(task_id),
            other => DispatchError::Store(other),
        }
    }
}

/// A validated submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub kind: MutationKind,
    pub course_id: CourseId,
    pub input: TaskInput,
    pub requester: UserId,
}

impl TaskRequest {
    /// Validate raw request fields.
    pub fn parse(
        kind: &str,
        course_id: &str,
        problem_url: &str,
        student: Option<&str>,
        requester: UserId,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            kind: kind.parse()?,
            course_id: CourseId::new(course_id)?,
            input: TaskInput {
                problem_url: ProblemUrl::new(problem_url)?,
                student: student.map(StudentId::new).transpose()?,
            },
            requester,
        })
    }
}

/// Creates task entries and hands them to a substrate.
pub struct TaskDispatcher<T, M, I> {
    runner: Arc<TaskRunner<T, M, I>>,
    substrate: Arc<dyn TaskSubstrate>,
    directory: Arc<dyn CourseDirectory>,
}

impl<T, M, I> Clone for TaskDispatcher<T, M, I> {
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            substrate: Arc::clone(&self.substrate),
            directory: Arc::clone(&self.directory),
        }
    }
}

impl<T, M, I> TaskDispatcher<T, M, I>
where
    T: TaskStore + 'static,
    M: ModuleStateStore + 'static,
    I: ModuleInstantiator + 'static,
{
    pub fn new(runner: Arc<TaskRunner<T, M, I>>, substrate: Arc<dyn TaskSubstrate>) -> Self {
        Self {
            runner,
            substrate,
            directory: Arc::new(OpenDirectory),
        }
    }

    /// Check problems and resolve student identifiers against `directory`.
    pub fn with_directory(mut self, directory: Arc<dyn CourseDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn runner(&self) -> &Arc<TaskRunner<T, M, I>> {
        &self.runner
    }

    /// Record a queued entry and submit it for execution.
    ///
    /// The entry exists before the body is submitted, so the returned id can be
    /// polled immediately. If submission fails the entry is marked failed.
    ///
    /// A student given by email is stored under the username it resolves to;
    /// identifiers the directory does not know are kept as given.
    pub fn dispatch(&self, request: TaskRequest) -> Result<TaskId, DispatchError> {
        let TaskRequest {
            kind,
            course_id,
            mut input,
            requester,
        } = request;

        if !self.directory.problem_exists(&course_id, &input.problem_url)? {
            return Err(DomainError::validation(format!(
                "problem {} not found in course {course_id}",
                input.problem_url
            ))
            .into());
        }

        if !self.runner.instantiator().supports(kind, &input.problem_url) {
            return Err(DomainError::validation(format!(
                "problem {} does not support {kind}",
                input.problem_url
            ))
            .into());
        }

        if let Some(student) = input.student.take() {
            let resolved = self.directory.resolve_student(student.as_str())?;
            input.student = Some(resolved.unwrap_or(student));
        }

        let entry = TaskEntry::new(course_id, kind, input, requester);
        let task_key = entry.task_key.clone();
        let task_id = self.runner.tasks().create(entry)?;
        info!(task_id = %task_id, kind = %kind, task_key = %task_key, requester = %requester, "task queued");

        let runner = Arc::clone(&self.runner);
        let submission = TaskSubmission {
            task_id,
            kind,
            body: Box::new(move || {
                if let Err(e) = runner.run(task_id) {
                    error!(task_id = %task_id, error = %e, "task run did not complete");
                }
            }),
        };

        if let Err(source) = self.substrate.submit(submission) {
            error!(task_id = %task_id, error = %source, "task submission failed");
            let cause = TaskError::new(
                "submit_error",
                source.to_string(),
                self.runner.config().max_message_len,
            );
            self.runner.tasks().fail(task_id, cause, 0)?;
            return Err(DispatchError::Submit { task_id, source });
        }
        Ok(task_id)
    }

    /// Status of one task.
    pub fn poll(&self, task_id: TaskId) -> Result<TaskStatus, DispatchError> {
        let entry = self
            .runner
            .tasks()
            .get(task_id)?
            .ok_or(DispatchError::NotFound(task_id))?;
        Ok(TaskStatus::from(&entry))
    }

    /// Status of every known task in `task_ids`; unknown ids are left out.
    pub fn poll_many(&self, task_ids: &[TaskId]) -> Result<Vec<TaskStatus>, DispatchError> {
        let mut statuses = Vec::with_capacity(task_ids.len());
        for &task_id in task_ids {
            if let Some(entry) = self.runner.tasks().get(task_id)? {
                statuses.push(TaskStatus::from(&entry));
            }
        }
        Ok(statuses)
    }

    /// Queued and in-progress tasks for a course.
    pub fn running(&self, course_id: &CourseId) -> Result<Vec<TaskEntry>, DispatchError> {
        Ok(self.runner.tasks().list_active(course_id)?)
    }

    /// Every task submitted for a problem, optionally of one kind.
    pub fn history(
        &self,
        course_id: &CourseId,
        problem_url: &ProblemUrl,
        kind: Option<MutationKind>,
    ) -> Result<Vec<TaskEntry>, DispatchError> {
        Ok(self.runner.tasks().history(course_id, problem_url, kind)?)
    }
}
