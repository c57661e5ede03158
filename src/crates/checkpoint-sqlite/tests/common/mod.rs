//! Common test utilities and setup

#![allow(dead_code)]

use draftloop_checkpoint::{CheckpointStream, CheckpointTuple};
use draftloop_checkpoint_sqlite::{SqliteCheckpointSaver, StoreConfig};
use futures::TryStreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

static TEST_DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("draftloop_checkpoint_sqlite=debug")
        .try_init();
}

/// Store config for a database file with a unique name
pub fn test_config() -> (TempDir, StoreConfig) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    // Unique database name to avoid conflicts
    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path: PathBuf = temp_dir.path().join(format!("test_{}.db", counter));

    (temp_dir, StoreConfig::for_path(db_path))
}

/// Create a file-backed test store
pub async fn setup_test_store() -> (TempDir, SqliteCheckpointSaver) {
    init_tracing();
    let (temp_dir, config) = test_config();

    let saver = SqliteCheckpointSaver::connect(&config)
        .await
        .expect("Failed to create test store");

    (temp_dir, saver)
}

pub async fn collect(stream: CheckpointStream) -> Vec<CheckpointTuple> {
    stream.try_collect().await.expect("listing failed")
}

pub fn ids(tuples: &[CheckpointTuple]) -> Vec<String> {
    tuples
        .iter()
        .filter_map(|tuple| tuple.checkpoint_id().map(str::to_owned))
        .collect()
}
