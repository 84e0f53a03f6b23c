//! The task entry record and its lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coursetasks_core::{CourseId, DomainError, DomainResult, ProblemUrl, StudentId, TaskId, UserId};

use crate::kind::{ContentFilter, MutationKind};
use crate::outcome::{TaskError, TaskOutcome};
use crate::progress::ProgressSnapshot;

/// Lifecycle state of a task entry.
///
/// ```text
/// Queued ──▶ InProgress ──▶ Succeeded | PartialSuccess | Failed
///    └──────────────────────────────────────────────────▶ Failed
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    InProgress,
    Succeeded,
    PartialSuccess,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::PartialSuccess | TaskState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::InProgress => "in_progress",
            TaskState::Succeeded => "succeeded",
            TaskState::PartialSuccess => "partial_success",
            TaskState::Failed => "failed",
        }
    }

    /// Terminal state for a run that processed every candidate.
    pub fn settle(progress: &ProgressSnapshot) -> TaskState {
        if progress.failed == 0 {
            TaskState::Succeeded
        } else if progress.succeeded > 0 {
            TaskState::PartialSuccess
        } else {
            TaskState::Failed
        }
    }
}

impl core::fmt::Display for TaskState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TaskState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskState::Queued),
            "in_progress" => Ok(TaskState::InProgress),
            "succeeded" => Ok(TaskState::Succeeded),
            "partial_success" => Ok(TaskState::PartialSuccess),
            "failed" => Ok(TaskState::Failed),
            other => Err(DomainError::validation(format!("unknown task state '{other}'"))),
        }
    }
}

/// Which records a task targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskInput {
    pub problem_url: ProblemUrl,
    /// `None` targets every student with state for the problem.
    pub student: Option<StudentId>,
}

impl TaskInput {
    /// Deterministic key identifying "the same work" for duplicate detection.
    pub fn task_key(&self, kind: MutationKind) -> String {
        match &self.student {
            Some(student) => format!("{kind}:{}:{student}", self.problem_url),
            None => format!("{kind}:{}", self.problem_url),
        }
    }
}

/// One durable record per submitted bulk mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: TaskId,
    pub course_id: CourseId,
    pub kind: MutationKind,
    pub input: TaskInput,
    pub filter: Option<ContentFilter>,
    pub task_key: String,
    pub requester: UserId,
    pub state: TaskState,
    pub progress: ProgressSnapshot,
    pub outcome: Option<TaskOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskEntry {
    /// Create a queued entry. The candidate filter is fixed by the kind.
    pub fn new(course_id: CourseId, kind: MutationKind, input: TaskInput, requester: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            task_key: input.task_key(kind),
            filter: kind.candidate_filter(),
            course_id,
            kind,
            input,
            requester,
            state: TaskState::Queued,
            progress: ProgressSnapshot::default(),
            outcome: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Claim the entry for execution (Queued → InProgress).
    pub fn mark_in_progress(&mut self) -> DomainResult<()> {
        self.require_state(TaskState::Queued, "start")?;
        let now = Utc::now();
        self.state = TaskState::InProgress;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Publish a progress snapshot for a running entry.
    ///
    /// The first snapshot fixes `total_candidates`; later ones must keep it and
    /// may only move counters forward.
    pub fn record_progress(&mut self, progress: ProgressSnapshot) -> DomainResult<()> {
        self.require_state(TaskState::InProgress, "record progress")?;
        if !progress.is_consistent() {
            return Err(DomainError::validation(format!(
                "inconsistent progress snapshot: {progress:?}"
            )));
        }
        let fixed_total = self.progress.total_candidates.is_some();
        if fixed_total && !self.progress.can_advance_to(&progress) {
            return Err(DomainError::validation(format!(
                "progress may not regress or change total ({:?} -> {:?})",
                self.progress, progress
            )));
        }
        self.progress = progress;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Commit a completed run. The terminal state follows from the counters.
    pub fn finish(&mut self, progress: ProgressSnapshot, outcome: TaskOutcome) -> DomainResult<TaskState> {
        self.require_state(TaskState::InProgress, "finish")?;
        if !progress.is_consistent() || !progress.is_complete() {
            return Err(DomainError::validation(format!(
                "cannot finish with unprocessed candidates: {progress:?}"
            )));
        }
        let now = Utc::now();
        self.state = TaskState::settle(&progress);
        self.progress = progress;
        self.outcome = Some(outcome);
        self.updated_at = now;
        self.finished_at = Some(now);
        Ok(self.state)
    }

    /// Abort the run. Allowed from any non-terminal state; counters are kept.
    pub fn fail(&mut self, error: TaskError, duration_ms: u64) -> DomainResult<()> {
        if self.state.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "task {} is already {}",
                self.id, self.state
            )));
        }
        let now = Utc::now();
        self.state = TaskState::Failed;
        self.outcome = Some(TaskOutcome::aborted(self.kind.action_name(), duration_ms, error));
        self.updated_at = now;
        self.finished_at = Some(now);
        Ok(())
    }

    /// The infrastructure cause of a failed run, if any.
    pub fn error(&self) -> Option<&TaskError> {
        self.outcome.as_ref().and_then(|o| o.error.as_ref())
    }

    fn require_state(&self, expected: TaskState, action: &str) -> DomainResult<()> {
        if self.state != expected {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} task {} in state {}",
                self.id, self.state
            )));
        }
        Ok(())
    }
}
