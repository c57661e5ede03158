//! # draftloop-checkpoint - Checkpoint Types and Storage Contract
//!
//! **Trait-based checkpoint abstractions** for persisting and restoring the state of a
//! multi-step drafting workflow. A workflow engine calls into a [`CheckpointSaver`] after
//! every state transition it wants to survive a crash, and reads back from it to resume,
//! inspect or branch.
//!
//! ## Overview
//!
//! - **Resume** - load the latest checkpoint of a thread and continue from there
//! - **Time travel** - load any earlier checkpoint by id
//! - **History** - list a thread's checkpoints newest first, filtered by metadata
//! - **Staging** - record task-scoped intermediate writes before the next checkpoint
//!
//! ## Core Concepts
//!
//! ### 1. Addressing
//!
//! Every checkpoint lives under `(thread_id, checkpoint_ns, checkpoint_id)`. A
//! [`CheckpointConfig`] names a thread, optionally a namespace (default `""`), and
//! optionally a checkpoint. Namespaces are fully isolated partitions of a thread.
//!
//! ### 2. Opaque Payloads
//!
//! [`Checkpoint`] and [`CheckpointMetadata`] wrap JSON documents. The store reads only the
//! checkpoint's `id` field, and returns both documents exactly as written.
//!
//! ### 3. Lineage
//!
//! When a config carrying a `checkpoint_id` is passed to `put`, that id becomes the
//! parent of the new checkpoint. Re-putting an existing id overwrites its payload but
//! never its parent.
//!
//! ### 4. Pending Writes
//!
//! [`PendingWrite`]s are `(task_id, idx, channel, value)` records staged against a
//! checkpoint. They are append-only and come back sorted by `(task_id, idx)`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use draftloop_checkpoint::{
//!     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
//!     InMemoryCheckpointSaver,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = InMemoryCheckpointSaver::new();
//!
//!     let config = CheckpointConfig::new().with_thread_id("thread-123");
//!     let saved = saver
//!         .put(
//!             &config,
//!             Checkpoint::new(json!({"channel_values": {"draft": ""}})),
//!             CheckpointMetadata::new().with_source(CheckpointSource::Input).with_step(-1),
//!         )
//!         .await?;
//!     println!("Checkpoint saved with ID: {:?}", saved.checkpoint_id);
//!
//!     saver
//!         .put_writes(&saved, vec![("draft".to_string(), json!("hello"))], "writer".to_string())
//!         .await?;
//!
//!     if let Some(tuple) = saver.get_tuple(&config).await? {
//!         println!("Latest checkpoint has {:?} pending writes", tuple.pending_writes.map(|w| w.len()));
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        Workflow engine (step loop)           │
//! └────────────────────┬─────────────────────────┘
//!                      │ put / put_writes / get_tuple / list
//!                      ▼
//! ┌──────────────────────────────────────────────┐
//! │        CheckpointSaver trait (this crate)    │
//! └────────────────────┬─────────────────────────┘
//!          ┌───────────┴────────────┐
//!          ▼                        ▼
//!  ┌──────────────┐      ┌──────────────────────┐
//!  │  In-Memory   │      │  SQLite              │
//!  │ (Reference)  │      │  (draftloop-         │
//!  │              │      │   checkpoint-sqlite) │
//!  └──────────────┘      └──────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`checkpoint`] - [`Checkpoint`], [`CheckpointConfig`], [`CheckpointMetadata`], [`PendingWrite`], [`CheckpointTuple`]
//! - [`traits`] - [`CheckpointSaver`] trait and [`CheckpointStream`]
//! - [`assembler`] - [`CheckpointRecord`] and [`assemble`], shared by backends
//! - [`memory`] - [`InMemoryCheckpointSaver`] reference implementation
//! - [`error`] - [`CheckpointError`] types

pub mod assembler;
pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod traits;

// Re-export main types
pub use assembler::{assemble, CheckpointRecord, PAYLOAD_ENCODING};
pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointSource,
    CheckpointTuple, PendingWrite, DEFAULT_NAMESPACE,
};
pub use error::{BoxError, CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use traits::{CheckpointSaver, CheckpointStream, MetadataFilter};
