//! Durable task entries.
//!
//! ## Components
//!
//! - `TaskStore`: lifecycle-checked persistence for task entries
//! - `InMemoryTaskStore`: tests and single-process deployments
//! - `PostgresTaskStore`: durable store (`postgres` feature)

pub mod store;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresTaskStore;
pub use store::{InMemoryTaskStore, TaskStore, TaskStoreError};
