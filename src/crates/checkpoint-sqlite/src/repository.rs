//! Checkpoint repository
//!
//! Reads and writes rows of the `checkpoints` table. Each row carries a `seq` number
//! assigned inside the upsert statement as one more than the partition's current
//! maximum, so "latest" and history order never depend on clock resolution.

use crate::connection::{map_sqlx_error, ConnectionManager};
use crate::ledger::PendingWriteLedger;
use chrono::{DateTime, Utc};
use draftloop_checkpoint::{
    assemble, Checkpoint, CheckpointConfig, CheckpointError, CheckpointMetadata,
    CheckpointRecord, CheckpointStream, CheckpointTuple, MetadataFilter, Result,
    PAYLOAD_ENCODING,
};
use futures::{future, stream, StreamExt, TryStreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};
use tracing::debug;

const UPSERT_CHECKPOINT: &str = r#"
    INSERT INTO checkpoints
        (thread_id, checkpoint_ns, checkpoint_id, parent_checkpoint_id, type, checkpoint, metadata, created_at, seq)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
        (SELECT COALESCE(MAX(seq), 0) + 1 FROM checkpoints WHERE thread_id = ?1 AND checkpoint_ns = ?2))
    ON CONFLICT (thread_id, checkpoint_ns, checkpoint_id) DO UPDATE SET
        checkpoint = excluded.checkpoint,
        metadata = excluded.metadata,
        created_at = excluded.created_at,
        seq = excluded.seq
    RETURNING seq
"#;

const SELECT_COLUMNS: &str = "thread_id, checkpoint_ns, checkpoint_id, parent_checkpoint_id, type, checkpoint, metadata, created_at, seq";

/// Durable checkpoint rows plus the ledger needed to assemble single-record reads
#[derive(Clone, Debug)]
pub struct CheckpointRepository {
    connections: ConnectionManager,
    ledger: PendingWriteLedger,
    page_size: i64,
}

impl CheckpointRepository {
    pub fn new(connections: ConnectionManager, ledger: PendingWriteLedger, page_size: usize) -> Self {
        Self {
            connections,
            ledger,
            page_size: page_size.max(1) as i64,
        }
    }

    /// Insert a checkpoint, or overwrite the payload of an existing one
    ///
    /// `config.checkpoint_id` is recorded as the parent on first insert only.
    pub async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: &Checkpoint,
        metadata: &CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let thread_id = config.require_thread()?;
        let checkpoint_ns = config.namespace();
        let checkpoint_id = checkpoint.resolve_id();
        let parent_checkpoint_id = config.checkpoint();

        let checkpoint_json = serde_json::to_string(checkpoint)?;
        let metadata_json = serde_json::to_string(metadata)?;

        let mut tx = self.connections.begin().await?;

        let seq: i64 = sqlx::query_scalar(UPSERT_CHECKPOINT)
            .bind(thread_id)
            .bind(checkpoint_ns)
            .bind(&checkpoint_id)
            .bind(parent_checkpoint_id)
            .bind(PAYLOAD_ENCODING)
            .bind(checkpoint_json)
            .bind(metadata_json)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(
            thread_id,
            checkpoint_ns,
            checkpoint_id = %checkpoint_id,
            parent_checkpoint_id,
            seq,
            "Stored checkpoint"
        );

        Ok(CheckpointConfig::for_checkpoint(
            thread_id,
            checkpoint_ns,
            checkpoint_id,
        ))
    }

    /// Load one checkpoint row
    ///
    /// An exact lookup when `config` names a checkpoint, otherwise the partition's most
    /// recently written row.
    pub async fn fetch(&self, config: &CheckpointConfig) -> Result<Option<CheckpointRecord>> {
        let Some(thread_id) = config.thread() else {
            return Ok(None);
        };
        let checkpoint_ns = config.namespace();

        let mut conn = self.connections.acquire().await?;

        let row = match config.checkpoint() {
            Some(checkpoint_id) => {
                sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM checkpoints \
                     WHERE thread_id = ? AND checkpoint_ns = ? AND checkpoint_id = ?"
                ))
                .bind(thread_id)
                .bind(checkpoint_ns)
                .bind(checkpoint_id)
                .fetch_optional(&mut *conn)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM checkpoints \
                     WHERE thread_id = ? AND checkpoint_ns = ? \
                     ORDER BY seq DESC, created_at DESC LIMIT 1"
                ))
                .bind(thread_id)
                .bind(checkpoint_ns)
                .fetch_optional(&mut *conn)
                .await
            }
        }
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_record).transpose()
    }

    /// Load a checkpoint together with its pending writes
    pub async fn get(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let Some(record) = self.fetch(config).await? else {
            debug!(thread_id = config.thread(), checkpoint_id = config.checkpoint(), "Checkpoint not found");
            return Ok(None);
        };

        let writes = self
            .ledger
            .writes_for(&record.thread_id, &record.checkpoint_ns, &record.checkpoint_id)
            .await?;

        debug!(
            thread_id = %record.thread_id,
            checkpoint_ns = %record.checkpoint_ns,
            checkpoint_id = %record.checkpoint_id,
            pending_writes = writes.len(),
            "Loaded checkpoint"
        );

        Ok(Some(assemble(&record, Some(&writes))))
    }

    /// Stream a partition's history, newest first
    ///
    /// Rows are fetched lazily, one page per round-trip, and no connection is held
    /// between pages. The listing is not a snapshot: a checkpoint re-put while the stream
    /// is being consumed moves above the page cursor and is not yielded again.
    pub async fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<MetadataFilter>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let Some((thread_id, checkpoint_ns)) =
            config.and_then(|config| config.thread().map(|thread_id| (thread_id, config.namespace())))
        else {
            return Ok(Box::pin(stream::empty()));
        };
        if limit == Some(0) {
            return Ok(Box::pin(stream::empty()));
        }

        let before_seq = match before.and_then(CheckpointConfig::checkpoint) {
            Some(before_id) => match self.seq_of(thread_id, checkpoint_ns, before_id).await? {
                Some(seq) => Some(seq),
                None => {
                    debug!(thread_id, checkpoint_ns, before = before_id, "Unknown `before` checkpoint, listing nothing");
                    return Ok(Box::pin(stream::empty()));
                }
            },
            None => None,
        };

        debug!(thread_id, checkpoint_ns, ?limit, "Listing checkpoints");

        let pages = RecordPages {
            connections: self.connections.clone(),
            thread_id: thread_id.to_string(),
            checkpoint_ns: checkpoint_ns.to_string(),
            page_size: self.page_size,
            cursor: before_seq,
            exhausted: false,
        };

        let tuples = stream::try_unfold(pages, RecordPages::next_page)
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, CheckpointError>)))
            .try_flatten()
            .try_filter(move |record| {
                let keep = match &filter {
                    Some(filter) => record
                        .metadata
                        .as_ref()
                        .map_or(filter.is_empty(), |metadata| metadata.matches(filter)),
                    None => true,
                };
                future::ready(keep)
            })
            .map_ok(|record| assemble(&record, None))
            .take(limit.unwrap_or(usize::MAX));

        Ok(Box::pin(tuples))
    }

    /// Remove every checkpoint and pending write of a thread, across all namespaces
    pub async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        if thread_id.is_empty() {
            return Err(CheckpointError::MissingIdentity);
        }

        let mut tx = self.connections.begin().await?;

        let checkpoints = sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();
        let writes = PendingWriteLedger::delete_thread(&mut tx, thread_id).await?;

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(thread_id, checkpoints, writes, "Deleted thread");
        Ok(())
    }

    async fn seq_of(
        &self,
        thread_id: &str,
        checkpoint_ns: &str,
        checkpoint_id: &str,
    ) -> Result<Option<i64>> {
        let mut conn = self.connections.acquire().await?;

        sqlx::query_scalar::<Sqlite, i64>(
            "SELECT seq FROM checkpoints WHERE thread_id = ? AND checkpoint_ns = ? AND checkpoint_id = ?",
        )
        .bind(thread_id)
        .bind(checkpoint_ns)
        .bind(checkpoint_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)
    }
}

/// Keyset pagination state for a history listing
struct RecordPages {
    connections: ConnectionManager,
    thread_id: String,
    checkpoint_ns: String,
    page_size: i64,
    /// Only rows with a lower `seq` are still to come
    cursor: Option<i64>,
    exhausted: bool,
}

impl RecordPages {
    async fn next_page(mut self) -> Result<Option<(Vec<CheckpointRecord>, Self)>> {
        if self.exhausted {
            return Ok(None);
        }

        let rows = {
            let mut conn = self.connections.acquire().await?;
            sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM checkpoints \
                 WHERE thread_id = ? AND checkpoint_ns = ? AND seq < ? \
                 ORDER BY seq DESC LIMIT ?"
            ))
            .bind(&self.thread_id)
            .bind(&self.checkpoint_ns)
            .bind(self.cursor.unwrap_or(i64::MAX))
            .bind(self.page_size)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_error)?
        };

        if rows.is_empty() {
            return Ok(None);
        }

        let records = rows
            .iter()
            .map(decode_record)
            .collect::<Result<Vec<_>>>()?;

        self.exhausted = (records.len() as i64) < self.page_size;
        self.cursor = records.last().map(|record| record.seq);

        Ok(Some((records, self)))
    }
}

fn decode_record(row: &SqliteRow) -> Result<CheckpointRecord> {
    let checkpoint: String = row.try_get("checkpoint").map_err(map_sqlx_error)?;
    let metadata: Option<String> = row.try_get("metadata").map_err(map_sqlx_error)?;
    let metadata = match metadata {
        Some(text) => CheckpointMetadata::from_value(serde_json::from_str(&text)?)?,
        None => None,
    };
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(map_sqlx_error)?;

    Ok(CheckpointRecord {
        thread_id: row.try_get("thread_id").map_err(map_sqlx_error)?,
        checkpoint_ns: row.try_get("checkpoint_ns").map_err(map_sqlx_error)?,
        checkpoint_id: row.try_get("checkpoint_id").map_err(map_sqlx_error)?,
        parent_checkpoint_id: row
            .try_get("parent_checkpoint_id")
            .map_err(map_sqlx_error)?,
        kind: row.try_get("type").map_err(map_sqlx_error)?,
        checkpoint: Checkpoint::new(serde_json::from_str(&checkpoint)?),
        metadata,
        created_at,
        seq: row.try_get("seq").map_err(map_sqlx_error)?,
    })
}
