//! Extensible checkpoint storage trait for backend implementations
//!
//! This module defines the **[`CheckpointSaver`]** trait, the contract a workflow engine
//! calls into after each state transition it wants to be durable. The store is passive:
//! it never calls out, it only answers `put`, `put_writes`, `get_tuple` and `list`.
//!
//! # Call Pattern
//!
//! ```text
//! 1. Step runs
//! 2. put_writes()   ← intermediate, task-scoped results of the in-flight step
//! 3. put()          ← snapshot of the state after the step
//! 4. get_tuple()    ← resume or inspect (latest, or a specific checkpoint)
//! 5. list()         ← enumerate history, newest first
//! ```
//!
//! # Implementation Requirements
//!
//! Implementations MUST:
//! 1. **Upsert** on `(thread_id, checkpoint_ns, checkpoint_id)`: re-putting an id replaces
//!    the payload and metadata and makes it the latest, but keeps the parent recorded on first insert
//! 2. **Isolate** namespaces: nothing written under one namespace is visible in another
//! 3. **Return `None`** (not an error) when nothing matches a read
//! 4. **Commit** each `put` / `put_writes` atomically
//! 5. **Order** pending writes by `(task_id, idx)` and history newest first
//!
//! Reference implementations:
//! - [`InMemoryCheckpointSaver`](crate::memory::InMemoryCheckpointSaver) in this crate
//! - `SqliteCheckpointSaver` in `draftloop-checkpoint-sqlite`

use crate::{
    checkpoint::{Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointTuple},
    error::Result,
};
use async_trait::async_trait;
use futures::stream::Stream;
use std::collections::HashMap;
use std::pin::Pin;

/// Type alias for async stream of checkpoint tuples
pub type CheckpointStream =
    Pin<Box<dyn Stream<Item = Result<CheckpointTuple>> + Send + 'static>>;

/// Metadata key/value pairs a listed checkpoint must carry
pub type MetadataFilter = HashMap<String, serde_json::Value>;

/// Core trait for implementing checkpoint storage backends
///
/// Implementations must be thread-safe (`Send + Sync`) so one store object can be
/// shared by concurrently running workflows.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Fetch just the checkpoint payload for `config`
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// Retrieve a complete checkpoint tuple.
    ///
    /// - `checkpoint_id` set: that exact checkpoint
    /// - `checkpoint_id` absent: the most recently written checkpoint of the
    ///   `(thread_id, checkpoint_ns)` partition
    ///
    /// The tuple carries the checkpoint's pending writes. A config without a thread,
    /// or one that matches nothing, yields `Ok(None)`.
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>>;

    /// Stream the history of a `(thread_id, checkpoint_ns)` partition, newest first.
    ///
    /// * `config` - partition to list; `None` or a config without a thread lists nothing
    /// * `filter` - metadata pairs every yielded checkpoint must carry
    /// * `before` - only checkpoints written before this one
    /// * `limit` - maximum number of tuples
    ///
    /// Listed tuples do not carry pending writes (`pending_writes` is `None`). Backends
    /// may read lazily, so writes made while the stream is consumed need not be reflected.
    async fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<MetadataFilter>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream>;

    /// Store a checkpoint.
    ///
    /// The id is the payload's `id` field or a fresh UUID; `config.checkpoint_id`, when
    /// set, becomes the parent of a newly inserted checkpoint. Returns the config
    /// addressing the stored checkpoint, ready to be passed to the next `put`.
    ///
    /// Fails with [`MissingIdentity`](crate::CheckpointError::MissingIdentity) when the
    /// config has no thread.
    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig>;

    /// Stage `(channel, value)` writes produced by `task_id` against the checkpoint
    /// named by `config`.
    ///
    /// Each write is stored at its position in `writes`. A config without a thread or
    /// checkpoint id is ignored. The checkpoint need not exist yet: writes staged ahead
    /// of their checkpoint are returned once it is stored. Re-using a `(task_id, idx)` already recorded for the
    /// checkpoint fails with
    /// [`ConstraintViolation`](crate::CheckpointError::ConstraintViolation) and stores
    /// nothing from the batch.
    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, serde_json::Value)>,
        task_id: String,
    ) -> Result<()>;

    /// Delete all checkpoints and writes associated with a thread, in every namespace
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
