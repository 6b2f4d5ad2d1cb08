//! Wiring of store, provider and the job runtime.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use playpulse_infra::jobs::{
    CancellationRegistry, Dispatcher, Executor, ExecutorConfig, LockRegistry, ManualTrigger,
    Scheduler, SchedulerConfig, WorkerHandle,
};
use playpulse_infra::provider::{HttpExportProvider, SharedProvider};
use playpulse_infra::store::{InMemoryIngestStore, PostgresIngestStore, SharedStore};
use playpulse_infra::IngestConfig;

const MAX_DB_CONNECTIONS: u32 = 10;

/// Everything the handlers and background loops share.
pub struct IngestServices {
    pub config: IngestConfig,
    pub store: SharedStore,
    pub locks: LockRegistry,
    pub cancellations: CancellationRegistry,
    pub executor: Arc<Executor>,
    pub trigger: ManualTrigger,
}

impl IngestServices {
    pub fn new(config: IngestConfig, store: SharedStore, provider: SharedProvider) -> Self {
        let cancellations = CancellationRegistry::new();
        let executor = Arc::new(Executor::new(
            store.clone(),
            provider,
            cancellations.clone(),
            ExecutorConfig::from_config(&config),
        ));
        let trigger = ManualTrigger::new(store.clone(), config.provider_offset);

        Self {
            config,
            store,
            locks: LockRegistry::new(),
            cancellations,
            executor,
            trigger,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.store.clone(), self.locks.clone(), self.executor.clone())
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.store.clone(),
            self.locks.clone(),
            SchedulerConfig::from_config(&self.config),
        )
    }

    /// Spawn the scheduler and dispatcher loops.
    pub fn start_workers(&self) -> Vec<WorkerHandle> {
        vec![
            self.scheduler().spawn(),
            self.dispatcher().spawn(self.config.dispatch_tick),
        ]
    }
}

/// Connect storage and the provider client as configured.
///
/// Without a database URL the service runs on the in-memory store.
pub async fn build_services(config: &IngestConfig) -> anyhow::Result<IngestServices> {
    let store: SharedStore = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(MAX_DB_CONNECTIONS)
                .connect(url)
                .await
                .context("failed to connect to postgres")?;
            let store = PostgresIngestStore::new(pool);
            store.migrate().await.context("failed to apply schema")?;
            tracing::info!("using postgres ingest store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (state is lost on exit)");
            Arc::new(InMemoryIngestStore::new())
        }
    };

    let provider = HttpExportProvider::new(&config.provider_base_url, config.request_timeout)
        .context("failed to build provider client")?;

    Ok(IngestServices::new(config.clone(), store, Arc::new(provider)))
}
