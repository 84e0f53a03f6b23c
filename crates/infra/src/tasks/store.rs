//! Task entry storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use coursetasks_core::{CourseId, DomainError, DomainResult, ProblemUrl, TaskId};
use coursetasks_tasks::{MutationKind, ProgressSnapshot, TaskEntry, TaskError, TaskOutcome, TaskState};

/// Durable task entry store.
///
/// Writers are the dispatcher (create) and the single worker running a task
/// (lifecycle transitions); pollers only read.
pub trait TaskStore: Send + Sync {
    /// Insert a new queued entry.
    ///
    /// Fails with [`TaskStoreError::AlreadyRunning`] when another active entry in
    /// the same course has the same task key.
    fn create(&self, entry: TaskEntry) -> Result<TaskId, TaskStoreError>;

    /// Get an entry by id.
    fn get(&self, task_id: TaskId) -> Result<Option<TaskEntry>, TaskStoreError>;

    /// Atomically apply a lifecycle transition to the stored entry and return
    /// the updated entry. If `apply` fails, nothing is written.
    fn modify(
        &self,
        task_id: TaskId,
        apply: &mut dyn FnMut(&mut TaskEntry) -> DomainResult<()>,
    ) -> Result<TaskEntry, TaskStoreError>;

    /// Active (queued or in-progress) entries for a course, oldest first.
    fn list_active(&self, course_id: &CourseId) -> Result<Vec<TaskEntry>, TaskStoreError>;

    /// Every entry for a problem, optionally narrowed to one kind, oldest first.
    fn history(
        &self,
        course_id: &CourseId,
        problem_url: &ProblemUrl,
        kind: Option<MutationKind>,
    ) -> Result<Vec<TaskEntry>, TaskStoreError>;

    /// Claim a queued entry for execution (Queued → InProgress).
    fn claim(&self, task_id: TaskId) -> Result<TaskEntry, TaskStoreError> {
        self.modify(task_id, &mut |entry| entry.mark_in_progress())
    }

    /// Publish a progress snapshot.
    fn record_progress(&self, task_id: TaskId, progress: ProgressSnapshot) -> Result<(), TaskStoreError> {
        self.modify(task_id, &mut |entry| entry.record_progress(progress))
            .map(|_| ())
    }

    /// Commit a completed run; returns the settled terminal state.
    fn finish(
        &self,
        task_id: TaskId,
        progress: ProgressSnapshot,
        outcome: TaskOutcome,
    ) -> Result<TaskState, TaskStoreError> {
        let mut outcome = Some(outcome);
        let entry = self.modify(task_id, &mut |entry| {
            let outcome = outcome
                .take()
                .ok_or_else(|| DomainError::invalid_transition("finish applied twice"))?;
            entry.finish(progress, outcome).map(|_| ())
        })?;
        Ok(entry.state)
    }

    /// Abort a run with an infrastructure cause.
    fn fail(&self, task_id: TaskId, error: TaskError, duration_ms: u64) -> Result<(), TaskStoreError> {
        self.modify(task_id, &mut |entry| entry.fail(error.clone(), duration_ms))
            .map(|_| ())
    }
}

/// Task store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),
    #[error("task {task_id} is already running for key '{task_key}'")]
    AlreadyRunning { task_id: TaskId, task_key: String },
    #[error("illegal task transition: {0}")]
    Transition(DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl<S> TaskStore for Arc<S>
where
    S: TaskStore + ?Sized,
{
    fn create(&self, entry: TaskEntry) -> Result<TaskId, TaskStoreError> {
        (**self).create(entry)
    }

    fn get(&self, task_id: TaskId) -> Result<Option<TaskEntry>, TaskStoreError> {
        (**self).get(task_id)
    }

    fn modify(
        &self,
        task_id: TaskId,
        apply: &mut dyn FnMut(&mut TaskEntry) -> DomainResult<()>,
    ) -> Result<TaskEntry, TaskStoreError> {
        (**self).modify(task_id, apply)
    }

    fn list_active(&self, course_id: &CourseId) -> Result<Vec<TaskEntry>, TaskStoreError> {
        (**self).list_active(course_id)
    }

    fn history(
        &self,
        course_id: &CourseId,
        problem_url: &ProblemUrl,
        kind: Option<MutationKind>,
    ) -> Result<Vec<TaskEntry>, TaskStoreError> {
        (**self).history(course_id, problem_url, kind)
    }

    fn claim(&self, task_id: TaskId) -> Result<TaskEntry, TaskStoreError> {
        (**self).claim(task_id)
    }

    fn record_progress(&self, task_id: TaskId, progress: ProgressSnapshot) -> Result<(), TaskStoreError> {
        (**self).record_progress(task_id, progress)
    }

    fn finish(
        &self,
        task_id: TaskId,
        progress: ProgressSnapshot,
        outcome: TaskOutcome,
    ) -> Result<TaskState, TaskStoreError> {
        (**self).finish(task_id, progress, outcome)
    }

    fn fail(&self, task_id: TaskId, error: TaskError, duration_ms: u64) -> Result<(), TaskStoreError> {
        (**self).fail(task_id, error, duration_ms)
    }
}

/// In-memory task store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> TaskStoreError {
        TaskStoreError::Storage("task store lock poisoned".to_string())
    }
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, entry: TaskEntry) -> Result<TaskId, TaskStoreError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::poisoned())?;
        if tasks.contains_key(&entry.id) {
            return Err(TaskStoreError::AlreadyExists(entry.id));
        }
        if let Some(active) = tasks.values().find(|t| {
            t.is_active() && t.course_id == entry.course_id && t.task_key == entry.task_key
        }) {
            return Err(TaskStoreError::AlreadyRunning {
                task_id: active.id,
                task_key: active.task_key.clone(),
            });
        }
        let id = entry.id;
        tasks.insert(id, entry);
        Ok(id)
    }

    fn get(&self, task_id: TaskId) -> Result<Option<TaskEntry>, TaskStoreError> {
        let tasks = self.tasks.read().map_err(|_| Self::poisoned())?;
        Ok(tasks.get(&task_id).cloned())
    }

    fn modify(
        &self,
        task_id: TaskId,
        apply: &mut dyn FnMut(&mut TaskEntry) -> DomainResult<()>,
    ) -> Result<TaskEntry, TaskStoreError> {
        let mut tasks = self.tasks.write().map_err(|_| Self::poisoned())?;
        let stored = tasks.get_mut(&task_id).ok_or(TaskStoreError::NotFound(task_id))?;

        // Apply to a copy so a rejected transition leaves the stored entry untouched.
        let mut next = stored.clone();
        apply(&mut next).map_err(TaskStoreError::Transition)?;
        *stored = next.clone();
        Ok(next)
    }

    fn list_active(&self, course_id: &CourseId) -> Result<Vec<TaskEntry>, TaskStoreError> {
        let tasks = self.tasks.read().map_err(|_| Self::poisoned())?;
        let mut result: Vec<_> = tasks
            .values()
            .filter(|t| t.is_active() && &t.course_id == course_id)
            .cloned()
            .collect();
        result.sort_by_key(|t| (t.created_at, t.id));
        Ok(result)
    }

    fn history(
        &self,
        course_id: &CourseId,
        problem_url: &ProblemUrl,
        kind: Option<MutationKind>,
    ) -> Result<Vec<TaskEntry>, TaskStoreError> {
        let tasks = self.tasks.read().map_err(|_| Self::poisoned())?;
        let mut result: Vec<_> = tasks
            .values()
            .filter(|t| {
                &t.course_id == course_id
                    && &t.input.problem_url == problem_url
                    && kind.is_none_or(|k| t.kind == k)
            })
            .cloned()
            .collect();
        result.sort_by_key(|t| (t.created_at, t.id));
        Ok(result)
    }
}
