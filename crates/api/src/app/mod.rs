//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store, runner, and worker pool wiring
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs and query parsing helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router over already-built services.
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
