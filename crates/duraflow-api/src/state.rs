//! Application state wiring the engine together.
//!
//! AppState holds the concrete instances used by every CLI command. The
//! scheduler and client are generic over the repository trait; AppState pins
//! them to the SQLite implementation.

use std::path::PathBuf;
use std::sync::Arc;

use duraflow_core::{Codec, HandlerRegistry, Scheduler, WorkflowClient};
use duraflow_infra::filesystem::ensure_data_dir;
use duraflow_infra::sqlite::execution::SqliteExecutionRepository;
use duraflow_infra::sqlite::pool::{DatabasePool, database_url};
use duraflow_types::config::EngineConfig;

use crate::workflows::register_demo_workflows;

pub type ConcreteScheduler = Scheduler<SqliteExecutionRepository>;
pub type ConcreteClient = WorkflowClient<SqliteExecutionRepository>;

/// Shared application state.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub codec: Arc<Codec>,
    pub registry: Arc<HandlerRegistry>,
    pub scheduler: ConcreteScheduler,
    pub client: ConcreteClient,
}

impl AppState {
    /// Open the DB under `data_dir` and register the bundled workflows.
    pub async fn init(data_dir: PathBuf, config: EngineConfig) -> anyhow::Result<Self> {
        ensure_data_dir(&data_dir).await?;

        let db_pool = DatabasePool::new(&database_url(&data_dir, &config.database_file)).await?;
        let repo = Arc::new(SqliteExecutionRepository::new(db_pool));

        let mut registry = HandlerRegistry::new();
        let mut codec = Codec::new();
        register_demo_workflows(&mut registry, &mut codec);
        let registry = Arc::new(registry);
        let codec = Arc::new(codec);

        let scheduler = Scheduler::new(repo.clone(), registry.clone(), codec.clone())
            .with_config(config.clone());
        let client = WorkflowClient::new(repo);

        tracing::debug!(data_dir = %data_dir.display(), ?config, "application state ready");

        Ok(Self {
            data_dir,
            config,
            codec,
            registry,
            scheduler,
            client,
        })
    }
}
