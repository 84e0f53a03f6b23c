//! HTTP API: task submission and status polling over axum.

pub mod app;
