//! Schema setup for the checkpoint tables

use crate::connection::{map_sqlx_error, ConnectionManager};
use draftloop_checkpoint::Result;
use tracing::{debug, info};

/// DDL run in order inside one transaction; every statement is idempotent
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS checkpoints (
        thread_id TEXT NOT NULL,
        checkpoint_ns TEXT NOT NULL DEFAULT '',
        checkpoint_id TEXT NOT NULL,
        parent_checkpoint_id TEXT,
        type TEXT,
        checkpoint TEXT NOT NULL,
        metadata TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        seq INTEGER NOT NULL,
        PRIMARY KEY (thread_id, checkpoint_ns, checkpoint_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS checkpoint_writes (
        thread_id TEXT NOT NULL,
        checkpoint_ns TEXT NOT NULL DEFAULT '',
        checkpoint_id TEXT NOT NULL,
        task_id TEXT NOT NULL,
        idx INTEGER NOT NULL,
        channel TEXT NOT NULL,
        value TEXT,
        created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        PRIMARY KEY (thread_id, checkpoint_ns, checkpoint_id, task_id, idx)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_thread_id ON checkpoints (thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_parent_checkpoint_id ON checkpoints (parent_checkpoint_id)",
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_partition_seq ON checkpoints (thread_id, checkpoint_ns, seq)",
];

/// Create the checkpoint tables and indexes if they do not exist yet
///
/// Safe to call on every startup and from several processes at once.
pub async fn ensure_schema(connections: &ConnectionManager) -> Result<()> {
    let mut tx = connections.begin().await?;

    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
    }

    tx.commit().await.map_err(map_sqlx_error)?;

    debug!(statements = SCHEMA.len(), "Applied checkpoint schema");
    info!("Checkpoint schema ready");
    Ok(())
}
