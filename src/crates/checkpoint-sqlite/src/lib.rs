//! # draftloop-checkpoint-sqlite - Durable Checkpoint Store
//!
//! A [`CheckpointSaver`](draftloop_checkpoint::CheckpointSaver) backed by SQLite through
//! `sqlx`. Checkpoints and pending writes live in two tables; every write is one
//! transaction, and history listings are streamed page by page.
//!
//! ## Components
//!
//! - [`config`] - [`StoreConfig`], loaded from TOML
//! - [`connection`] - [`ConnectionManager`], the pool and driver error mapping
//! - [`schema`] - [`ensure_schema`], idempotent table and index creation
//! - [`repository`] - [`CheckpointRepository`], checkpoint upsert, lookup and listing
//! - [`ledger`] - [`PendingWriteLedger`], append-only task writes
//! - [`store`] - [`SqliteCheckpointSaver`], the store object callers hold
//!
//! ## Tables
//!
//! ```text
//! checkpoints        PK (thread_id, checkpoint_ns, checkpoint_id)
//!                    parent_checkpoint_id, type, checkpoint, metadata, created_at, seq
//! checkpoint_writes  PK (thread_id, checkpoint_ns, checkpoint_id, task_id, idx)
//!                    channel, value, created_at
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use draftloop_checkpoint::{CheckpointConfig, CheckpointSaver};
//! use draftloop_checkpoint_sqlite::SqliteCheckpointSaver;
//! use futures::TryStreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = SqliteCheckpointSaver::from_config_file("draftloop.toml").await?;
//!
//!     let config = CheckpointConfig::new().with_thread_id("T1");
//!     let history: Vec<_> = saver.list(Some(&config), None, None, Some(10)).await?.try_collect().await?;
//!     println!("{} checkpoints", history.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod ledger;
pub mod repository;
pub mod schema;
pub mod store;

pub use config::{JournalMode, StoreConfig};
pub use connection::{map_sqlx_error, ConnectionManager};
pub use ledger::PendingWriteLedger;
pub use repository::CheckpointRepository;
pub use schema::ensure_schema;
pub use store::SqliteCheckpointSaver;
