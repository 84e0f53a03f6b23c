use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use coursetasks_infra::{DispatchError, TaskRequest};
use coursetasks_tasks::TaskStatus;

use crate::app::services::{AppServices, Dispatcher};
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(poll_many).post(submit_task))
        .route("/running", get(running_tasks))
        .route("/history", get(task_history))
        .route("/:id", get(poll_task))
}

/// Run a dispatcher call on the blocking pool; stores may block on I/O.
async fn blocking<T, F>(services: &AppServices, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&Dispatcher) -> Result<T, DispatchError> + Send + 'static,
{
    let dispatcher = services.dispatcher().clone();
    match tokio::task::spawn_blocking(move || f(&dispatcher)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(errors::dispatch_error_to_response(e)),
        Err(e) => {
            tracing::error!(error = %e, "dispatcher call did not complete");
            Err(errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e.to_string()))
        }
    }
}

pub async fn submit_task(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SubmitTaskRequest>,
) -> Response {
    let request = match TaskRequest::parse(
        &body.kind,
        &body.course_id,
        &body.problem_url,
        body.student.as_deref(),
        body.requester,
    ) {
        Ok(r) => r,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    };

    match blocking(&services, move |d| d.dispatch(request)).await {
        Ok(task_id) => (StatusCode::ACCEPTED, Json(dto::SubmitTaskResponse { task_id })).into_response(),
        Err(resp) => resp,
    }
}

pub async fn poll_task(Extension(services): Extension<Arc<AppServices>>, Path(id): Path<String>) -> Response {
    let task_id = match dto::parse_task_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match blocking(&services, move |d| d.poll(task_id)).await {
        Ok(status) => Json(status).into_response(),
        Err(resp) => resp,
    }
}

pub async fn poll_many(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::TaskIdsQuery>,
) -> Response {
    let ids = match dto::parse_task_ids(&query.ids) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match blocking(&services, move |d| d.poll_many(&ids)).await {
        Ok(statuses) => Json(statuses).into_response(),
        Err(resp) => resp,
    }
}

pub async fn running_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::RunningQuery>,
) -> Response {
    let course_id = match dto::parse_course(&query.course_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match blocking(&services, move |d| d.running(&course_id)).await {
        Ok(entries) => Json(entries.iter().map(TaskStatus::from).collect::<Vec<_>>()).into_response(),
        Err(resp) => resp,
    }
}

pub async fn task_history(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::HistoryQuery>,
) -> Response {
    let parsed = dto::parse_course(&query.course_id).and_then(|course| {
        let problem = dto::parse_problem(&query.problem_url)?;
        let kind = dto::parse_kind(query.kind.as_deref())?;
        Ok((course, problem, kind))
    });
    let (course_id, problem_url, kind) = match parsed {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match blocking(&services, move |d| d.history(&course_id, &problem_url, kind)).await {
        Ok(entries) => Json(entries.iter().map(TaskStatus::from).collect::<Vec<_>>()).into_response(),
        Err(resp) => resp,
    }
}
