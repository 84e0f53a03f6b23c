use axum::Router;

pub mod system;
pub mod tasks;

/// Router for all task endpoints.
pub fn router() -> Router {
    Router::new().nest("/tasks", tasks::router())
}
