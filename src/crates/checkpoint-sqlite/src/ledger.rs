//! Pending-write ledger
//!
//! Rows of `checkpoint_writes` are append-only. A batch from one task is inserted in a
//! single transaction: either every write lands or none does.

use crate::connection::{map_sqlx_error, ConnectionManager};
use chrono::Utc;
use draftloop_checkpoint::{CheckpointConfig, PendingWrite, Result};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, warn};

/// Staging area for task-scoped writes recorded against a checkpoint
#[derive(Clone, Debug)]
pub struct PendingWriteLedger {
    connections: ConnectionManager,
}

impl PendingWriteLedger {
    pub fn new(connections: ConnectionManager) -> Self {
        Self { connections }
    }

    /// Record `writes` produced by `task_id` against the checkpoint named by `config`
    ///
    /// Each write is stored at its position in the batch. Without both a thread and a
    /// checkpoint id the call does nothing.
    pub async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: &[(String, Value)],
        task_id: &str,
    ) -> Result<()> {
        let (Some(thread_id), Some(checkpoint_id)) = (config.thread(), config.checkpoint()) else {
            debug!(task_id, "Skipping pending writes without thread and checkpoint id");
            return Ok(());
        };
        if writes.is_empty() {
            return Ok(());
        }
        let checkpoint_ns = config.namespace();
        let created_at = Utc::now();

        let mut tx = self.connections.begin().await?;

        for (idx, (channel, value)) in writes.iter().enumerate() {
            let value = encode_value(value)?;

            let result = sqlx::query(
                r#"
                INSERT INTO checkpoint_writes
                    (thread_id, checkpoint_ns, checkpoint_id, task_id, idx, channel, value, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(thread_id)
            .bind(checkpoint_ns)
            .bind(checkpoint_id)
            .bind(task_id)
            .bind(idx as i64)
            .bind(channel)
            .bind(value)
            .bind(created_at)
            .execute(&mut *tx)
            .await;

            if let Err(err) = result {
                let err = map_sqlx_error(err);
                if err.is_constraint_violation() {
                    warn!(
                        thread_id,
                        checkpoint_ns,
                        checkpoint_id,
                        task_id,
                        idx,
                        "Rejected pending write batch"
                    );
                }
                return Err(err);
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(
            thread_id,
            checkpoint_ns,
            checkpoint_id,
            task_id,
            count = writes.len(),
            "Stored pending writes"
        );
        Ok(())
    }

    /// All writes recorded against one checkpoint, ordered by `(task_id, idx)`
    pub async fn writes_for(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
        checkpoint_id: &str,
    ) -> Result<Vec<PendingWrite>> {
        let mut conn = self.connections.acquire().await?;

        let rows = sqlx::query(
            r#"
            SELECT task_id, idx, channel, value
            FROM checkpoint_writes
            WHERE thread_id = ? AND checkpoint_ns = ? AND checkpoint_id = ?
            ORDER BY task_id, idx
            "#,
        )
        .bind(thread_id)
        .bind(checkpoint_ns)
        .bind(checkpoint_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(decode_write).collect()
    }

    /// Remove every write of a thread using the caller's transaction
    pub async fn delete_thread(conn: &mut SqliteConnection, thread_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM checkpoint_writes WHERE thread_id = ?")
            .bind(thread_id)
            .execute(conn)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

/// JSON `null` is stored as SQL `NULL`
fn encode_value(value: &Value) -> Result<Option<String>> {
    if value.is_null() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(value)?))
    }
}

fn decode_write(row: &SqliteRow) -> Result<PendingWrite> {
    let value: Option<String> = row.try_get("value").map_err(map_sqlx_error)?;
    let value = match value {
        Some(text) => serde_json::from_str(&text)?,
        None => Value::Null,
    };

    Ok(PendingWrite {
        task_id: row.try_get("task_id").map_err(map_sqlx_error)?,
        idx: row.try_get("idx").map_err(map_sqlx_error)?,
        channel: row.try_get("channel").map_err(map_sqlx_error)?,
        value,
    })
}
