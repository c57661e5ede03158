//! Assembly of stored rows into caller-facing [`CheckpointTuple`]s
//!
//! Backends fetch a [`CheckpointRecord`] (and, for single-record reads, its pending
//! writes) and hand both to [`assemble`]. Assembly does no I/O and never mutates its
//! inputs.

use crate::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointTuple,
    PendingWrite,
};
use chrono::{DateTime, Utc};

/// Tag stored in a record's `kind` for JSON-encoded payloads
pub const PAYLOAD_ENCODING: &str = "json";

/// One stored checkpoint row
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub thread_id: String,
    pub checkpoint_ns: String,
    pub checkpoint_id: CheckpointId,
    /// Soft pointer to the checkpoint this one was derived from
    pub parent_checkpoint_id: Option<CheckpointId>,
    /// Free-form tag (backends record the payload encoding here)
    pub kind: Option<String>,
    pub checkpoint: Checkpoint,
    pub metadata: Option<CheckpointMetadata>,
    pub created_at: DateTime<Utc>,
    /// Per-partition write order; higher is more recent
    pub seq: i64,
}

impl CheckpointRecord {
    /// Config addressing this record
    pub fn config(&self) -> CheckpointConfig {
        CheckpointConfig::for_checkpoint(
            self.thread_id.clone(),
            self.checkpoint_ns.clone(),
            self.checkpoint_id.clone(),
        )
    }

    /// Config addressing the parent, in the same partition
    pub fn parent_config(&self) -> Option<CheckpointConfig> {
        self.parent_checkpoint_id.as_ref().map(|parent_id| {
            CheckpointConfig::for_checkpoint(
                self.thread_id.clone(),
                self.checkpoint_ns.clone(),
                parent_id.clone(),
            )
        })
    }
}

/// Combine a record and its pending writes into a tuple
///
/// `pending_writes` is `None` for listings; otherwise the writes are copied in the
/// order given, which backends supply sorted by `(task_id, idx)`.
pub fn assemble(
    record: &CheckpointRecord,
    pending_writes: Option<&[PendingWrite]>,
) -> CheckpointTuple {
    CheckpointTuple {
        config: record.config(),
        checkpoint: record.checkpoint.clone(),
        metadata: record.metadata.clone().unwrap_or_default(),
        parent_config: record.parent_config(),
        pending_writes: pending_writes.map(<[PendingWrite]>::to_vec),
    }
}
