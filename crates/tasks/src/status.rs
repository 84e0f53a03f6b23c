//! Poller-facing status view and human-readable completion messages.

use serde::{Deserialize, Serialize};

use coursetasks_core::TaskId;

use crate::entry::{TaskEntry, TaskState};
use crate::outcome::TaskOutcome;
use crate::progress::ProgressSnapshot;

/// What a poller sees for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    pub in_progress: bool,
    pub action_name: String,
    pub progress: ProgressSnapshot,
    pub outcome: Option<TaskOutcome>,
    /// True only when every attempted candidate was mutated.
    pub succeeded: bool,
    pub message: String,
}

impl From<&TaskEntry> for TaskStatus {
    fn from(entry: &TaskEntry) -> Self {
        let (succeeded, message) = completion_info(entry);
        Self {
            task_id: entry.id,
            state: entry.state,
            in_progress: entry.is_active(),
            action_name: entry.kind.action_name().to_string(),
            progress: entry.progress,
            outcome: entry.outcome.clone(),
            succeeded,
            message,
        }
    }
}

/// Summarize an entry as `(succeeded, message)`.
///
/// `succeeded` is true only for entries that settled as `Succeeded`. Skipped
/// candidates are reported next to the counts and never read as failures.
pub fn completion_info(entry: &TaskEntry) -> (bool, String) {
    let action = entry.kind.action_name();
    let p = &entry.progress;

    match entry.state {
        TaskState::Queued => (false, "No status information available".to_string()),
        TaskState::InProgress => match p.total_candidates {
            Some(total) => (
                false,
                format!(
                    "Progress: {action} {} of {} so far{} (out of {total})",
                    p.succeeded,
                    p.attempted,
                    skipped_suffix(p)
                ),
            ),
            None => (false, "No progress status information available".to_string()),
        },
        state => {
            if let Some(error) = entry.error() {
                return (false, error.message.clone());
            }
            let total = p.total_candidates.unwrap_or(p.attempted);
            let message = match &entry.input.student {
                Some(student) => single_student_message(action, student.as_str(), p),
                None => all_students_message(action, p, total),
            };
            (state == TaskState::Succeeded, message)
        }
    }
}

fn skipped_suffix(p: &ProgressSnapshot) -> String {
    if p.skipped == 0 {
        String::new()
    } else {
        format!(" ({} skipped)", p.skipped)
    }
}

fn single_student_message(action: &str, student: &str, p: &ProgressSnapshot) -> String {
    if p.attempted == 0 {
        format!("Unable to find submission to be {action} for student '{student}'")
    } else if p.skipped == p.attempted {
        format!("Problem not {action} for student '{student}' (skipped)")
    } else if p.failed == 0 {
        format!("Problem successfully {action} for student '{student}'")
    } else {
        format!("Problem failed to be {action} for student '{student}'")
    }
}

fn all_students_message(action: &str, p: &ProgressSnapshot, total: u64) -> String {
    let mut message = if p.attempted == 0 {
        format!("Unable to find any students with submissions to be {action}")
    } else if p.failed == 0 {
        format!("Problem successfully {action} for {} students", p.succeeded)
    } else if p.succeeded == 0 {
        format!("Problem failed to be {action} for any of {} students", p.attempted)
    } else {
        format!("Problem {action} for {} of {} students", p.succeeded, p.attempted)
    };
    message.push_str(&skipped_suffix(p));

    if p.attempted != total {
        message.push_str(&format!(" (out of {total})"));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::TaskInput;
    use crate::kind::MutationKind;
    use crate::outcome::TaskError;
    use coursetasks_core::{CourseId, ProblemUrl, StudentId, UserId};

    fn entry(student: Option<&str>) -> TaskEntry {
        TaskEntry::new(
            CourseId::new("edx/1.23x/test_course").unwrap(),
            MutationKind::Rescore,
            TaskInput {
                problem_url: ProblemUrl::new("i4x://edx/1.23x/problem/test_urlname").unwrap(),
                student: student.map(|s| StudentId::new(s).unwrap()),
            },
            UserId::new(),
        )
    }

    /// Settle an entry with the given counters.
    fn finished(student: Option<&str>, progress: ProgressSnapshot) -> TaskEntry {
        let mut e = entry(student);
        e.state = TaskState::settle(&progress);
        e.progress = progress;
        e.outcome = Some(TaskOutcome::completed("rescored", 10, progress.failed, vec![]));
        e
    }

    fn counts(total: u64, succeeded: u64, skipped: u64, failed: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            total_candidates: Some(total),
            attempted: succeeded + skipped + failed,
            succeeded,
            skipped,
            failed,
        }
    }

    #[test]
    fn all_students_messages() {
        // (total, succeeded, skipped, failed, flag, message)
        let cases = [
            (10, 0, 0, 0, true, "Unable to find any students with submissions to be rescored (out of 10)"),
            (10, 0, 0, 10, false, "Problem failed to be rescored for any of 10 students"),
            (10, 8, 0, 2, false, "Problem rescored for 8 of 10 students"),
            (10, 8, 0, 1, false, "Problem rescored for 8 of 9 students (out of 10)"),
            (10, 10, 0, 0, true, "Problem successfully rescored for 10 students"),
            (10, 7, 3, 0, true, "Problem successfully rescored for 7 students (3 skipped)"),
            (10, 5, 3, 2, false, "Problem rescored for 5 of 10 students (3 skipped)"),
            (10, 0, 1, 9, false, "Problem failed to be rescored for any of 10 students (1 skipped)"),
        ];
        for (total, succeeded, skipped, failed, ok, expected) in cases {
            let (s, msg) = completion_info(&finished(None, counts(total, succeeded, skipped, failed)));
            assert_eq!(msg, expected);
            assert_eq!(s, ok, "{expected}");
        }
    }

    #[test]
    fn skip_only_run_is_a_success() {
        let e = finished(None, counts(2, 0, 2, 0));
        assert_eq!(e.state, TaskState::Succeeded);

        let status = TaskStatus::from(&e);
        assert!(status.succeeded);
        assert_eq!(status.message, "Problem successfully rescored for 0 students (2 skipped)");

        let (s, msg) = completion_info(&finished(Some("student"), counts(1, 0, 1, 0)));
        assert!(s);
        assert_eq!(msg, "Problem not rescored for student 'student' (skipped)");
    }

    #[test]
    fn single_student_messages() {
        let (s, msg) = completion_info(&finished(Some("student"), counts(1, 0, 0, 1)));
        assert!(!s);
        assert_eq!(msg, "Problem failed to be rescored for student 'student'");

        let (s, msg) = completion_info(&finished(Some("student"), counts(1, 1, 0, 0)));
        assert!(s);
        assert_eq!(msg, "Problem successfully rescored for student 'student'");
    }

    #[test]
    fn queued_and_running_messages() {
        let mut e = entry(None);
        assert_eq!(completion_info(&e), (false, "No status information available".to_string()));

        e.mark_in_progress().unwrap();
        assert_eq!(completion_info(&e).1, "No progress status information available");

        e.record_progress(ProgressSnapshot {
            total_candidates: Some(10),
            attempted: 5,
            succeeded: 4,
            skipped: 0,
            failed: 1,
        })
        .unwrap();
        assert_eq!(completion_info(&e).1, "Progress: rescored 4 of 5 so far (out of 10)");

        e.record_progress(ProgressSnapshot {
            total_candidates: Some(10),
            attempted: 7,
            succeeded: 5,
            skipped: 1,
            failed: 1,
        })
        .unwrap();
        assert_eq!(completion_info(&e).1, "Progress: rescored 5 of 7 so far (1 skipped) (out of 10)");
    }

    #[test]
    fn failed_run_reports_its_cause() {
        let mut e = entry(None);
        e.fail(TaskError::new("selection_error", "task failed horribly", 1000), 3)
            .unwrap();
        let status = TaskStatus::from(&e);
        assert!(!status.in_progress);
        assert!(!status.succeeded);
        assert_eq!(status.message, "task failed horribly");
        assert_eq!(status.state, TaskState::Failed);
    }
}
