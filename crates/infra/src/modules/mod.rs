//! Per-student module state and the module instances mutations act on.

pub mod instance;
pub mod store;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use instance::{
    InstanceError, JsonStateInstantiator, ModuleHandle, ModuleInstantiator, Rescorer, correct_map_rescorer,
};
#[cfg(feature = "postgres")]
pub use postgres::PostgresModuleStateStore;
pub use store::{
    InMemoryModuleStateStore, ModuleStateQuery, ModuleStateRecord, ModuleStateStore,
    ModuleStoreError,
};
