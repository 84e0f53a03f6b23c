use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use coursetasks_infra::DispatchError;

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    match err {
        DispatchError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        DispatchError::AlreadyRunning { task_id, task_key } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "already_running",
                "message": format!("a task for '{task_key}' is already queued or running"),
                "task_id": task_id,
            })),
        )
            .into_response(),
        DispatchError::NotFound(task_id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("task {task_id} not found"))
        }
        DispatchError::Store(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
        DispatchError::Directory(e) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "directory_error", e.to_string())
        }
        err @ DispatchError::Submit { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "submit_error", err.to_string())
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
