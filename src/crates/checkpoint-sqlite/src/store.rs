//! The SQLite-backed [`CheckpointSaver`]

use crate::config::StoreConfig;
use crate::connection::ConnectionManager;
use crate::ledger::PendingWriteLedger;
use crate::repository::CheckpointRepository;
use crate::schema::ensure_schema;
use async_trait::async_trait;
use draftloop_checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointStream,
    CheckpointTuple, MetadataFilter, Result,
};
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// Durable checkpoint store
///
/// Cloning is cheap: clones share one connection pool. The store keeps no state
/// between calls apart from that pool.
///
/// # Example
///
/// ```rust,no_run
/// use draftloop_checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver};
/// use draftloop_checkpoint_sqlite::{SqliteCheckpointSaver, StoreConfig};
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let saver = SqliteCheckpointSaver::connect(&StoreConfig::new("sqlite://checkpoints.db")).await?;
///
///     let config = CheckpointConfig::new().with_thread_id("T1");
///     let saved = saver
///         .put(&config, Checkpoint::new(json!({"step": 1})), CheckpointMetadata::new())
///         .await?;
///
///     let latest = saver.get_tuple(&config).await?;
///     assert_eq!(latest.map(|tuple| tuple.config), Some(saved));
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct SqliteCheckpointSaver {
    connections: ConnectionManager,
    checkpoints: CheckpointRepository,
    writes: PendingWriteLedger,
}

impl SqliteCheckpointSaver {
    /// Open the pool described by `config` and make sure the schema exists
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let connections = ConnectionManager::connect(config).await?;
        ensure_schema(&connections).await?;

        let writes = PendingWriteLedger::new(connections.clone());
        let checkpoints =
            CheckpointRepository::new(connections.clone(), writes.clone(), config.list_page_size);

        info!(url = %config.url, "Checkpoint store ready");

        Ok(Self {
            connections,
            checkpoints,
            writes,
        })
    }

    /// Load a TOML config file and connect with it
    pub async fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = StoreConfig::load(path).await?;
        Self::connect(&config).await
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn ledger(&self) -> &PendingWriteLedger {
        &self.writes
    }

    pub async fn health_check(&self) -> Result<()> {
        self.connections.health_check().await
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        self.connections.close().await;
    }
}

#[async_trait]
impl CheckpointSaver for SqliteCheckpointSaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        self.checkpoints.get(config).await
    }

    async fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<MetadataFilter>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        self.checkpoints.list(config, filter, before, limit).await
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        self.checkpoints.put(config, &checkpoint, &metadata).await
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, Value)>,
        task_id: String,
    ) -> Result<()> {
        self.writes.put_writes(config, &writes, &task_id).await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.checkpoints.delete_thread(thread_id).await
    }
}
