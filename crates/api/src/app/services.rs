//! Service wiring: task/module stores, the runner, and the worker pool.
//!
//! `DATABASE_URL` selects Postgres-backed stores; without it everything is
//! in memory (dev/test). Rescoring is only supported when a [`Rescorer`] is
//! supplied.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tokio::runtime::Handle;
use tracing::{info, warn};

use coursetasks_infra::modules::{
    InMemoryModuleStateStore, JsonStateInstantiator, ModuleInstantiator, ModuleStateStore,
    PostgresModuleStateStore, Rescorer,
};
use coursetasks_infra::tasks::{InMemoryTaskStore, PostgresTaskStore, TaskStore};
use coursetasks_infra::{
    CourseDirectory, ExecutorConfig, SubstrateError, TaskDispatcher, TaskRunner, WorkerPool,
};

// Type-erased dispatcher shared by in-memory and persistent wiring.
pub type Dispatcher =
    TaskDispatcher<Arc<dyn TaskStore>, Arc<dyn ModuleStateStore>, Arc<dyn ModuleInstantiator>>;

pub struct AppServices {
    dispatcher: Dispatcher,
    pool: Arc<WorkerPool>,
}

impl AppServices {
    /// Start a worker pool and wire a dispatcher over the given stores.
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        modules: Arc<dyn ModuleStateStore>,
        instantiator: Arc<dyn ModuleInstantiator>,
        config: ExecutorConfig,
    ) -> Result<Self, SubstrateError> {
        let pool = Arc::new(WorkerPool::spawn(&config)?);
        let runner = TaskRunner::new(tasks, modules, instantiator, config);
        let dispatcher = TaskDispatcher::new(Arc::new(runner), pool.clone());
        Ok(Self { dispatcher, pool })
    }

    /// In-memory wiring over a caller-supplied module store.
    pub fn in_memory(
        modules: Arc<InMemoryModuleStateStore>,
        instantiator: Arc<dyn ModuleInstantiator>,
        config: ExecutorConfig,
    ) -> Result<Self, SubstrateError> {
        Self::new(InMemoryTaskStore::arc(), modules, instantiator, config)
    }

    /// Validate submissions against `directory` instead of accepting every problem.
    pub fn with_directory(mut self, directory: Arc<dyn CourseDirectory>) -> Self {
        self.dispatcher = self.dispatcher.with_directory(directory);
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stop accepting tasks and wait for queued ones. Blocks.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

pub async fn build_services(rescorer: Option<Rescorer>) -> anyhow::Result<AppServices> {
    let config = ExecutorConfig::from_env();

    match std::env::var("DATABASE_URL") {
        Ok(url) => build_persistent_services(&url, config, rescorer).await,
        Err(_) => {
            warn!("DATABASE_URL not set; using in-memory stores");
            build_in_memory_services(config, rescorer)
        }
    }
}

fn json_instantiator<S: ModuleStateStore>(store: S, rescorer: Option<Rescorer>) -> JsonStateInstantiator<S> {
    let instantiator = JsonStateInstantiator::new(store);
    match rescorer {
        Some(rescorer) => instantiator.with_rescorer(move |state| rescorer(state)),
        None => instantiator,
    }
}

pub fn build_in_memory_services(
    config: ExecutorConfig,
    rescorer: Option<Rescorer>,
) -> anyhow::Result<AppServices> {
    let modules = InMemoryModuleStateStore::arc();
    let instantiator = Arc::new(json_instantiator(modules.clone(), rescorer));
    Ok(AppServices::in_memory(modules, instantiator, config)?)
}

async fn build_persistent_services(
    database_url: &str,
    config: ExecutorConfig,
    rescorer: Option<Rescorer>,
) -> anyhow::Result<AppServices> {
    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    // Stores bridge onto this runtime from worker threads.
    let runtime = Handle::current();
    let tasks = Arc::new(PostgresTaskStore::new(pool.clone(), runtime.clone()));
    let modules = Arc::new(PostgresModuleStateStore::new(pool, runtime));

    tasks.ensure_schema().await.context("failed to prepare task table")?;
    modules
        .ensure_schema()
        .await
        .context("failed to prepare module state table")?;

    info!("using Postgres-backed stores");
    let instantiator = Arc::new(json_instantiator(modules.clone(), rescorer));
    Ok(AppServices::new(tasks, modules, instantiator, config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursetasks_core::ProblemUrl;
    use coursetasks_infra::modules::{ModuleInstantiator, correct_map_rescorer};
    use coursetasks_tasks::MutationKind;

    fn supports_rescore(services: &AppServices) -> bool {
        let problem = ProblemUrl::new("i4x://edx/1.23x/problem/H1P1").unwrap();
        services
            .dispatcher()
            .runner()
            .instantiator()
            .supports(MutationKind::Rescore, &problem)
    }

    #[test]
    fn injected_rescorer_enables_rescoring() {
        let config = ExecutorConfig::default().with_workers(1);
        let plain = build_in_memory_services(config.clone(), None).unwrap();
        assert!(!supports_rescore(&plain));
        plain.shutdown();

        let scoring = build_in_memory_services(config, Some(correct_map_rescorer())).unwrap();
        assert!(supports_rescore(&scoring));
        scoring.shutdown();
    }
}
