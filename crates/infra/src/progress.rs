//! Progress tracking for one running task.

use std::sync::Mutex;

use tracing::debug;

use coursetasks_core::TaskId;
use coursetasks_tasks::{CandidateOutcome, FailureRecord, ProgressSnapshot};

use crate::config::ExecutorConfig;
use crate::tasks::{TaskStore, TaskStoreError};

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("failed to flush progress for task {task_id}: {source}")]
    Flush {
        task_id: TaskId,
        #[source]
        source: TaskStoreError,
    },
    #[error("progress tracker lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct TrackerState {
    snapshot: ProgressSnapshot,
    unflushed: usize,
    failures: Vec<FailureRecord>,
}

/// Counts outcomes and publishes snapshots to the task store.
///
/// All counter updates and flushes happen under one lock, so every published
/// snapshot is internally consistent and later flushes never regress.
pub struct ProgressTracker<'a, T: ?Sized> {
    store: &'a T,
    task_id: TaskId,
    flush_every: usize,
    max_failure_samples: usize,
    state: Mutex<TrackerState>,
}

impl<'a, T> ProgressTracker<'a, T>
where
    T: TaskStore + ?Sized,
{
    /// Publish the sized, empty snapshot and start tracking.
    pub fn start(
        store: &'a T,
        task_id: TaskId,
        total: u64,
        config: &ExecutorConfig,
    ) -> Result<Self, ProgressError> {
        let snapshot = ProgressSnapshot::with_total(total);
        store
            .record_progress(task_id, snapshot)
            .map_err(|source| ProgressError::Flush { task_id, source })?;

        Ok(Self {
            store,
            task_id,
            flush_every: config.flush_every(),
            max_failure_samples: config.max_failure_samples,
            state: Mutex::new(TrackerState {
                snapshot,
                unflushed: 0,
                failures: Vec::new(),
            }),
        })
    }

    pub fn record_success(&self) -> Result<(), ProgressError> {
        self.record(CandidateOutcome::Succeeded, None)
    }

    pub fn record_skip(&self) -> Result<(), ProgressError> {
        self.record(CandidateOutcome::Skipped, None)
    }

    pub fn record_failure(&self, failure: FailureRecord) -> Result<(), ProgressError> {
        self.record(CandidateOutcome::Failed, Some(failure))
    }

    fn record(&self, outcome: CandidateOutcome, failure: Option<FailureRecord>) -> Result<(), ProgressError> {
        let mut state = self.state.lock().map_err(|_| ProgressError::Poisoned)?;
        state.snapshot.record(outcome);
        if let Some(failure) = failure {
            if state.failures.len() < self.max_failure_samples {
                state.failures.push(failure);
            }
        }
        state.unflushed += 1;

        if state.unflushed >= self.flush_every {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// Current counters.
    pub fn snapshot(&self) -> Result<ProgressSnapshot, ProgressError> {
        Ok(self.state.lock().map_err(|_| ProgressError::Poisoned)?.snapshot)
    }

    /// Stop tracking; returns the final counters and the failure sample.
    ///
    /// The final snapshot is not flushed here: it is committed together with the
    /// terminal state.
    pub fn finish(self) -> Result<(ProgressSnapshot, Vec<FailureRecord>), ProgressError> {
        let state = self.state.into_inner().map_err(|_| ProgressError::Poisoned)?;
        Ok((state.snapshot, state.failures))
    }

    fn flush_locked(&self, state: &mut TrackerState) -> Result<(), ProgressError> {
        self.store
            .record_progress(self.task_id, state.snapshot)
            .map_err(|source| ProgressError::Flush {
                task_id: self.task_id,
                source,
            })?;
        debug!(task_id = %self.task_id, attempted = state.snapshot.attempted, "progress flushed");
        state.unflushed = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::InMemoryTaskStore;
    use coursetasks_core::{CourseId, ProblemUrl, StudentId, UserId};
    use coursetasks_tasks::{MutationKind, TaskEntry, TaskInput};

    fn running_task(store: &InMemoryTaskStore) -> TaskId {
        let entry = TaskEntry::new(
            CourseId::new("edx/1.23x/test_course").unwrap(),
            MutationKind::DeleteState,
            TaskInput {
                problem_url: ProblemUrl::new("i4x://edx/1.23x/problem/H1P1").unwrap(),
                student: None,
            },
            UserId::new(),
        );
        let id = store.create(entry).unwrap();
        store.claim(id).unwrap();
        id
    }

    fn failure(n: usize) -> FailureRecord {
        FailureRecord {
            student: StudentId::new(format!("robot{n}")).unwrap(),
            kind: "persistence".to_string(),
            cause: "boom".to_string(),
        }
    }

    #[test]
    fn start_publishes_total() {
        let store = InMemoryTaskStore::new();
        let id = running_task(&store);
        ProgressTracker::start(&store, id, 12, &ExecutorConfig::default()).unwrap();

        let stored = store.get(id).unwrap().unwrap();
        assert_eq!(stored.progress, ProgressSnapshot::with_total(12));
    }

    #[test]
    fn flushes_every_n_outcomes() {
        let store = InMemoryTaskStore::new();
        let id = running_task(&store);
        let config = ExecutorConfig::default().with_flush_every(3);
        let tracker = ProgressTracker::start(&store, id, 10, &config).unwrap();

        tracker.record_success().unwrap();
        tracker.record_skip().unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().progress.attempted, 0);

        tracker.record_failure(failure(1)).unwrap();
        let stored = store.get(id).unwrap().unwrap().progress;
        assert_eq!(stored.attempted, 3);
        assert_eq!((stored.succeeded, stored.skipped, stored.failed), (1, 1, 1));
        assert!(stored.is_consistent());
    }

    #[test]
    fn failure_sample_is_capped_but_count_is_not() {
        let store = InMemoryTaskStore::new();
        let id = running_task(&store);
        let config = ExecutorConfig::default().with_max_failure_samples(2);
        let tracker = ProgressTracker::start(&store, id, 5, &config).unwrap();

        for n in 0..5 {
            tracker.record_failure(failure(n)).unwrap();
        }
        let (snapshot, failures) = tracker.finish().unwrap();
        assert_eq!(snapshot.failed, 5);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].student.as_str(), "robot0");
    }

    #[test]
    fn flush_against_terminal_task_fails() {
        let store = InMemoryTaskStore::new();
        let id = running_task(&store);
        let config = ExecutorConfig::default().with_flush_every(1);
        let tracker = ProgressTracker::start(&store, id, 2, &config).unwrap();

        store
            .fail(id, coursetasks_tasks::TaskError::new("selection_error", "x", 10), 0)
            .unwrap();
        assert!(matches!(tracker.record_success(), Err(ProgressError::Flush { .. })));
    }
}
