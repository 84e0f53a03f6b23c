use axum::http::StatusCode;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use coursetasks_core::{CourseId, ProblemUrl, TaskId, UserId};
use coursetasks_tasks::MutationKind;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub kind: String,
    pub course_id: String,
    pub problem_url: String,
    #[serde(default)]
    pub student: Option<String>,
    pub requester: UserId,
}

/// `?ids=<uuid>,<uuid>`
#[derive(Debug, Deserialize)]
pub struct TaskIdsQuery {
    #[serde(default)]
    pub ids: String,
}

#[derive(Debug, Deserialize)]
pub struct RunningQuery {
    pub course_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub course_id: String,
    pub problem_url: String,
    #[serde(default)]
    pub kind: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: TaskId,
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_task_id(raw: &str) -> Result<TaskId, Response> {
    raw.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid task id '{raw}'")))
}

pub fn parse_task_ids(raw: &str) -> Result<Vec<TaskId>, Response> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_task_id)
        .collect()
}

pub fn parse_course(raw: &str) -> Result<CourseId, Response> {
    CourseId::new(raw).map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

pub fn parse_problem(raw: &str) -> Result<ProblemUrl, Response> {
    ProblemUrl::new(raw).map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

pub fn parse_kind(raw: Option<&str>) -> Result<Option<MutationKind>, Response> {
    raw.map(|k| {
        k.parse::<MutationKind>()
            .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_kind", e.to_string()))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_lists_ignore_blanks() {
        let a = TaskId::new();
        let b = TaskId::new();
        let ids = parse_task_ids(&format!("{a}, ,{b},")).unwrap();
        assert_eq!(ids, vec![a, b]);
        assert!(parse_task_ids("").unwrap().is_empty());
        assert!(parse_task_ids("nope").is_err());
    }

    #[test]
    fn kind_is_optional() {
        assert_eq!(parse_kind(None).unwrap(), None);
        assert_eq!(parse_kind(Some("delete_state")).unwrap(), Some(MutationKind::DeleteState));
        assert!(parse_kind(Some("regrade")).is_err());
    }
}
