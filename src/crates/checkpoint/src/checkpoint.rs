//! Core checkpoint data structures for state persistence and time-travel
//!
//! This module defines the value types exchanged between a workflow engine and a
//! checkpoint store: **[`CheckpointConfig`]**, **[`Checkpoint`]**,
//! **[`CheckpointMetadata`]**, **[`PendingWrite`]** and **[`CheckpointTuple`]**.
//!
//! # Overview
//!
//! - **Opaque payloads** - [`Checkpoint`] and [`CheckpointMetadata`] wrap JSON documents
//!   the store never interprets, apart from reading the checkpoint's `id` field
//! - **Addressing** - a checkpoint lives under `(thread_id, checkpoint_ns, checkpoint_id)`
//! - **Lineage** - each stored checkpoint may point at the checkpoint it was derived from
//! - **Staging** - [`PendingWrite`]s are task-scoped values recorded against a checkpoint
//!   before the next one is committed
//!
//! # Addressing Checkpoints
//!
//! The same [`CheckpointConfig`] shape is used for every call, and every config the
//! store hands back can be fed straight into the next call:
//!
//! ```text
//! put(config{thread="T1"})               -> config{thread="T1", id=K1}
//! put(config{thread="T1", id=K1}, ...)   -> config{thread="T1", id=K2}   (parent = K1)
//! get_tuple(config{thread="T1"})         -> latest (K2)
//! get_tuple(config{thread="T1", id=K1})  -> exactly K1
//! put_writes(config{thread="T1", id=K2}) -> staged against K2
//! ```
//!
//! | Field | On `put` | On reads | On `put_writes` |
//! |-------|----------|----------|-----------------|
//! | `thread_id` | required | required (absent = nothing found) | required (absent = no-op) |
//! | `checkpoint_ns` | partition, default `""` | partition | partition |
//! | `checkpoint_id` | parent of the new checkpoint | exact target, absent = latest | owning checkpoint (absent = no-op) |
//!
//! # Checkpoint Ids
//!
//! A checkpoint's id comes from the `id` string field of its payload. Payloads without
//! one get a fresh random UUID at write time:
//!
//! ```rust
//! use draftloop_checkpoint::Checkpoint;
//! use serde_json::json;
//!
//! let with_id = Checkpoint::new(json!({"id": "step-1", "channel_values": {}}));
//! assert_eq!(with_id.resolve_id(), "step-1");
//!
//! let without_id = Checkpoint::new(json!({"step": 1}));
//! assert_eq!(without_id.resolve_id().len(), 36);
//! ```
//!
//! # Metadata
//!
//! ```rust
//! use draftloop_checkpoint::{CheckpointMetadata, CheckpointSource};
//! use serde_json::json;
//!
//! let metadata = CheckpointMetadata::new()
//!     .with_source(CheckpointSource::Loop)
//!     .with_step(3)
//!     .with_extra("writer", json!("draft"));
//!
//! assert_eq!(metadata.get("source"), Some(&json!("loop")));
//! ```

use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Namespace used when a config does not name one
pub const DEFAULT_NAMESPACE: &str = "";

/// Metadata source type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointSource {
    /// Checkpoint created from an input to the workflow
    Input,
    /// Checkpoint created from inside the step loop
    Loop,
    /// Checkpoint created from a manual state update
    Update,
    /// Checkpoint created as a copy of another checkpoint
    Fork,
}

impl CheckpointSource {
    /// Wire name stored in metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Loop => "loop",
            Self::Update => "update",
            Self::Fork => "fork",
        }
    }
}

/// Metadata associated with a checkpoint
///
/// An opaque JSON object. The builder methods only write well-known keys; any
/// key a caller stores is returned untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(transparent)]
pub struct CheckpointMetadata(Map<String, Value>);

impl CheckpointMetadata {
    /// Create empty metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source
    pub fn with_source(self, source: CheckpointSource) -> Self {
        self.with_extra("source", Value::String(source.as_str().to_string()))
    }

    /// Set the step number
    pub fn with_step(self, step: i64) -> Self {
        self.with_extra("step", Value::from(step))
    }

    /// Set parent checkpoints, keyed by namespace
    pub fn with_parents(self, parents: HashMap<String, String>) -> Self {
        let parents = parents
            .into_iter()
            .map(|(ns, id)| (ns, Value::String(id)))
            .collect::<Map<_, _>>();
        self.with_extra("parents", Value::Object(parents))
    }

    /// Add custom metadata
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Look up a top-level key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every `(key, value)` pair of `filter` is present with an equal value
    pub fn matches(&self, filter: &HashMap<String, Value>) -> bool {
        filter.iter().all(|(key, value)| self.0.get(key) == Some(value))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Decode a stored document; `null` means "no metadata"
    pub fn from_value(value: Value) -> Result<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) => Ok(Some(Self(map))),
            other => Err(CheckpointError::Invalid(format!(
                "metadata must be a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }
}

impl From<Map<String, Value>> for CheckpointMetadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// State snapshot at a given point in time
///
/// The payload is whatever document the workflow engine chose to persist. The
/// store reads only its `id` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Checkpoint(Value);

impl Checkpoint {
    /// Wrap a payload
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Create an empty checkpoint (an empty object with no id)
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Set the `id` field
    ///
    /// Payloads that are not JSON objects cannot carry an id and are returned unchanged.
    pub fn with_id(mut self, id: impl Into<CheckpointId>) -> Self {
        if let Value::Object(map) = &mut self.0 {
            map.insert("id".to_string(), Value::String(id.into()));
        }
        self
    }

    /// The payload's own id, if it carries a non-empty one
    ///
    /// Strings are taken as they are; any other non-null value (`{"id": 5}`) is
    /// stored under its JSON text.
    pub fn id(&self) -> Option<CheckpointId> {
        match self.0.get("id")? {
            Value::Null => None,
            Value::String(id) if id.is_empty() => None,
            Value::String(id) => Some(id.clone()),
            other => Some(other.to_string()),
        }
    }

    /// The id this checkpoint is stored under: its own, or a fresh UUID
    pub fn resolve_id(&self) -> CheckpointId {
        self.id().unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Look up a top-level field of the payload
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Checkpoint {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Configuration for checkpoint operations
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Thread ID for grouping related checkpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Checkpoint namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_ns: Option<String>,

    /// Specific checkpoint ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<CheckpointId>,
}

impl CheckpointConfig {
    /// Create a new checkpoint configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Fully-resolved config addressing one stored checkpoint
    pub fn for_checkpoint(
        thread_id: impl Into<String>,
        checkpoint_ns: impl Into<String>,
        checkpoint_id: impl Into<CheckpointId>,
    ) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            checkpoint_ns: Some(checkpoint_ns.into()),
            checkpoint_id: Some(checkpoint_id.into()),
        }
    }

    /// Set the thread ID
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Set the checkpoint ID
    pub fn with_checkpoint_id(mut self, checkpoint_id: impl Into<CheckpointId>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Set the checkpoint namespace
    pub fn with_checkpoint_ns(mut self, checkpoint_ns: impl Into<String>) -> Self {
        self.checkpoint_ns = Some(checkpoint_ns.into());
        self
    }

    /// The thread id, treating an empty string as absent
    pub fn thread(&self) -> Option<&str> {
        self.thread_id.as_deref().filter(|id| !id.is_empty())
    }

    /// The thread id, or [`CheckpointError::MissingIdentity`]
    pub fn require_thread(&self) -> Result<&str> {
        self.thread().ok_or(CheckpointError::MissingIdentity)
    }

    /// The namespace, defaulting to [`DEFAULT_NAMESPACE`]
    pub fn namespace(&self) -> &str {
        self.checkpoint_ns.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// The checkpoint id, treating an empty string as absent
    pub fn checkpoint(&self) -> Option<&str> {
        self.checkpoint_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// A staged write recorded against a checkpoint before it is committed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingWrite {
    /// Task that produced the write
    pub task_id: String,
    /// Position of the write within its task's batch
    pub idx: i64,
    /// State slot being written
    pub channel: String,
    /// Written value (`null` when the task wrote nothing)
    pub value: Value,
}

impl PendingWrite {
    pub fn new(
        task_id: impl Into<String>,
        idx: i64,
        channel: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            idx,
            channel: channel.into(),
            value,
        }
    }
}

/// A tuple containing a checkpoint and its associated data
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointTuple {
    /// Fully-resolved config of this checkpoint
    pub config: CheckpointConfig,

    /// The checkpoint itself
    pub checkpoint: Checkpoint,

    /// Metadata associated with the checkpoint (empty when none was stored)
    pub metadata: CheckpointMetadata,

    /// Config of the checkpoint this one was derived from
    pub parent_config: Option<CheckpointConfig>,

    /// Pending writes, ordered by `(task_id, idx)`
    ///
    /// `None` when the tuple came from a listing, which skips the ledger.
    pub pending_writes: Option<Vec<PendingWrite>>,
}

impl CheckpointTuple {
    /// Create a new checkpoint tuple
    pub fn new(
        config: CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Self {
        Self {
            config,
            checkpoint,
            metadata,
            parent_config: None,
            pending_writes: None,
        }
    }

    /// Set the parent configuration
    pub fn with_parent_config(mut self, parent_config: CheckpointConfig) -> Self {
        self.parent_config = Some(parent_config);
        self
    }

    /// Attach pending writes
    pub fn with_pending_writes(mut self, pending_writes: Vec<PendingWrite>) -> Self {
        self.pending_writes = Some(pending_writes);
        self
    }

    /// Id of this checkpoint
    pub fn checkpoint_id(&self) -> Option<&str> {
        self.config.checkpoint()
    }

    /// Id of the parent checkpoint
    pub fn parent_checkpoint_id(&self) -> Option<&str> {
        self.parent_config.as_ref().and_then(CheckpointConfig::checkpoint)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
