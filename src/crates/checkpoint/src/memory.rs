//! In-memory checkpoint storage for development and testing
//!
//! This module provides **[`InMemoryCheckpointSaver`]**, a reference implementation of the
//! [`CheckpointSaver`] trait that keeps every checkpoint and pending write in a
//! `tokio::sync::RwLock`-guarded map. It follows exactly the contract of the durable
//! SQLite store (upsert, namespace partitions, newest-first ordering, parent
//! preservation, append-only pending writes), so tests written against one hold for the
//! other.
//!
//! # When to Use
//!
//! **Use In-Memory Checkpoints For:**
//! - ✅ Unit and integration tests
//! - ✅ Short-lived, single-process workflows
//!
//! **Avoid In-Memory For:**
//! - ❌ Anything that must survive a restart
//! - ❌ Multi-process deployments
//!
//! # Storage Layout
//!
//! ```text
//! (thread_id, checkpoint_ns) ──► Partition
//!                                 ├─ records:  checkpoint_id → CheckpointRecord (with seq)
//!                                 ├─ next_seq: last assigned write order
//!                                 └─ writes:   (checkpoint_id, task_id, idx) → PendingWrite
//! ```
//!
//! The write map is ordered, so a checkpoint's writes come out sorted by `(task_id, idx)`.

use crate::{
    assembler::{assemble, CheckpointRecord, PAYLOAD_ENCODING},
    checkpoint::{
        Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointTuple,
        PendingWrite,
    },
    error::{CheckpointError, Result},
    traits::{CheckpointSaver, CheckpointStream, MetadataFilter},
};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Key of a pending write within a partition
type WriteKey = (CheckpointId, String, i64);

/// All state of one `(thread_id, checkpoint_ns)` partition
#[derive(Debug, Default)]
struct Partition {
    records: HashMap<CheckpointId, CheckpointRecord>,
    next_seq: i64,
    writes: BTreeMap<WriteKey, PendingWrite>,
}

impl Partition {
    fn latest(&self) -> Option<&CheckpointRecord> {
        self.records.values().max_by_key(|record| record.seq)
    }

    fn writes_for(&self, checkpoint_id: &str) -> Vec<PendingWrite> {
        self.writes
            .iter()
            .filter(|((owner, _, _), _)| owner == checkpoint_id)
            .map(|(_, write)| write.clone())
            .collect()
    }
}

/// Thread-safe in-memory checkpoint storage
type CheckpointStorage = Arc<RwLock<HashMap<(String, String), Partition>>>;

/// In-memory checkpoint saver implementation
///
/// # Example
///
/// ```rust
/// use draftloop_checkpoint::{
///     Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver,
///     InMemoryCheckpointSaver,
/// };
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let saver = InMemoryCheckpointSaver::new();
///     let config = CheckpointConfig::new().with_thread_id("T1");
///
///     let saved = saver
///         .put(&config, Checkpoint::new(json!({"step": 1})), CheckpointMetadata::new())
///         .await?;
///
///     let tuple = saver.get_tuple(&saved).await?.expect("just stored");
///     assert_eq!(tuple.checkpoint.get("step"), Some(&json!(1)));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointSaver {
    storage: CheckpointStorage,
}

impl InMemoryCheckpointSaver {
    /// Create a new in-memory checkpoint saver
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the number of threads holding at least one checkpoint
    pub async fn thread_count(&self) -> usize {
        self.storage
            .read()
            .await
            .iter()
            .filter(|(_, partition)| !partition.records.is_empty())
            .map(|((thread_id, _), _)| thread_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Get the total number of checkpoints across all threads
    pub async fn checkpoint_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|partition| partition.records.len())
            .sum()
    }

    /// Clear all checkpoints and writes (useful for testing)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for InMemoryCheckpointSaver {
    fn default() -> Self {
        Self::new()
    }
}

fn partition_key(thread_id: &str, config: &CheckpointConfig) -> (String, String) {
    (thread_id.to_string(), config.namespace().to_string())
}

#[async_trait]
impl CheckpointSaver for InMemoryCheckpointSaver {
    async fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>> {
        let Some(thread_id) = config.thread() else {
            return Ok(None);
        };

        let storage = self.storage.read().await;
        let Some(partition) = storage.get(&partition_key(thread_id, config)) else {
            return Ok(None);
        };

        let record = match config.checkpoint() {
            Some(checkpoint_id) => partition.records.get(checkpoint_id),
            None => partition.latest(),
        };

        Ok(record.map(|record| {
            let writes = partition.writes_for(&record.checkpoint_id);
            assemble(record, Some(&writes))
        }))
    }

    async fn list(
        &self,
        config: Option<&CheckpointConfig>,
        filter: Option<MetadataFilter>,
        before: Option<&CheckpointConfig>,
        limit: Option<usize>,
    ) -> Result<CheckpointStream> {
        let Some((config, thread_id)) =
            config.and_then(|config| config.thread().map(|thread_id| (config, thread_id)))
        else {
            return Ok(Box::pin(stream::empty()));
        };

        let storage = self.storage.read().await;
        let Some(partition) = storage.get(&partition_key(thread_id, config)) else {
            return Ok(Box::pin(stream::empty()));
        };

        let before_seq = match before.and_then(CheckpointConfig::checkpoint) {
            Some(before_id) => match partition.records.get(before_id) {
                Some(record) => Some(record.seq),
                None => return Ok(Box::pin(stream::empty())),
            },
            None => None,
        };

        let mut records: Vec<&CheckpointRecord> = partition
            .records
            .values()
            .filter(|record| before_seq.map_or(true, |seq| record.seq < seq))
            .filter(|record| match &filter {
                Some(filter) => record
                    .metadata
                    .as_ref()
                    .map_or(filter.is_empty(), |metadata| metadata.matches(filter)),
                None => true,
            })
            .collect();
        records.sort_by(|a, b| b.seq.cmp(&a.seq));

        let results: Vec<Result<CheckpointTuple>> = records
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|record| Ok(assemble(record, None)))
            .collect();

        Ok(Box::pin(stream::iter(results)))
    }

    async fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
    ) -> Result<CheckpointConfig> {
        let thread_id = config.require_thread()?;
        let checkpoint_ns = config.namespace();
        let checkpoint_id = checkpoint.resolve_id();

        let mut storage = self.storage.write().await;
        let partition = storage
            .entry(partition_key(thread_id, config))
            .or_default();
        partition.next_seq += 1;
        let seq = partition.next_seq;
        let created_at = Utc::now();

        match partition.records.entry(checkpoint_id.clone()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.checkpoint = checkpoint;
                record.metadata = Some(metadata);
                record.created_at = created_at;
                record.seq = seq;
            }
            Entry::Vacant(entry) => {
                entry.insert(CheckpointRecord {
                    thread_id: thread_id.to_string(),
                    checkpoint_ns: checkpoint_ns.to_string(),
                    checkpoint_id: checkpoint_id.clone(),
                    parent_checkpoint_id: config.checkpoint().map(str::to_owned),
                    kind: Some(PAYLOAD_ENCODING.to_string()),
                    checkpoint,
                    metadata: Some(metadata),
                    created_at,
                    seq,
                });
            }
        }

        debug!(thread_id, checkpoint_ns, checkpoint_id = %checkpoint_id, seq, "Stored checkpoint in memory");

        Ok(CheckpointConfig::for_checkpoint(
            thread_id,
            checkpoint_ns,
            checkpoint_id,
        ))
    }

    async fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: Vec<(String, serde_json::Value)>,
        task_id: String,
    ) -> Result<()> {
        let (Some(thread_id), Some(checkpoint_id)) = (config.thread(), config.checkpoint()) else {
            return Ok(());
        };
        if writes.is_empty() {
            return Ok(());
        }

        let mut storage = self.storage.write().await;
        // The ledger may run ahead of the checkpoint; a partition holding only writes
        // counts as neither a thread nor a checkpoint.
        let partition = storage
            .entry(partition_key(thread_id, config))
            .or_default();

        let keys: Vec<WriteKey> = (0..writes.len())
            .map(|idx| (checkpoint_id.to_string(), task_id.clone(), idx as i64))
            .collect();
        if let Some((_, _, idx)) = keys.iter().find(|key| partition.writes.contains_key(*key)) {
            return Err(CheckpointError::ConstraintViolation(
                format!(
                    "pending write ({}, {}) already recorded for checkpoint {}",
                    task_id, idx, checkpoint_id
                )
                .into(),
            ));
        }

        let count = writes.len();
        for (key, (channel, value)) in keys.into_iter().zip(writes) {
            let write = PendingWrite::new(task_id.clone(), key.2, channel, value);
            partition.writes.insert(key, write);
        }

        debug!(thread_id, checkpoint_id, task_id = %task_id, count, "Staged pending writes in memory");
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        if thread_id.is_empty() {
            return Err(CheckpointError::MissingIdentity);
        }
        let mut storage = self.storage.write().await;
        storage.retain(|(owner, _), _| owner != thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointSource;
    use futures::TryStreamExt;
    use proptest::prelude::*;
    use serde_json::json;

    fn thread(thread_id: &str) -> CheckpointConfig {
        CheckpointConfig::new().with_thread_id(thread_id)
    }

    async fn collect(stream: CheckpointStream) -> Vec<CheckpointTuple> {
        stream.try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load_checkpoint() {
        let saver = InMemoryCheckpointSaver::new();
        let checkpoint = Checkpoint::new(json!({"step": 1})).with_id("k-1");
        let metadata = CheckpointMetadata::new().with_source(CheckpointSource::Input);

        let saved_config = saver
            .put(&thread("thread-1"), checkpoint.clone(), metadata)
            .await
            .unwrap();

        assert_eq!(saved_config, CheckpointConfig::for_checkpoint("thread-1", "", "k-1"));

        let tuple = saver.get_tuple(&saved_config).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint, checkpoint);
        assert_eq!(tuple.metadata.get("source"), Some(&json!("input")));
        assert_eq!(tuple.pending_writes, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_put_requires_thread() {
        let saver = InMemoryCheckpointSaver::new();

        let result = saver
            .put(&CheckpointConfig::new(), Checkpoint::empty(), CheckpointMetadata::new())
            .await;

        assert!(matches!(result, Err(CheckpointError::MissingIdentity)));
        assert_eq!(saver.checkpoint_count().await, 0);
    }

    #[tokio::test]
    async fn test_upsert_keeps_first_parent() {
        let saver = InMemoryCheckpointSaver::new();
        let first = saver
            .put(&thread("T1"), Checkpoint::new(json!({"step": 1})), CheckpointMetadata::new())
            .await
            .unwrap();
        let parent = first.checkpoint_id.clone().unwrap();

        let child = Checkpoint::new(json!({"step": 2})).with_id("child");
        saver
            .put(&first, child.clone(), CheckpointMetadata::new())
            .await
            .unwrap();
        saver
            .put(
                &thread("T1"),
                Checkpoint::new(json!({"step": 3})).with_id("child"),
                CheckpointMetadata::new().with_step(3),
            )
            .await
            .unwrap();

        let tuple = saver
            .get_tuple(&thread("T1").with_checkpoint_id("child"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tuple.checkpoint.get("step"), Some(&json!(3)));
        assert_eq!(tuple.metadata.get("step"), Some(&json!(3)));
        assert_eq!(tuple.parent_checkpoint_id(), Some(parent.as_str()));
        assert_eq!(saver.checkpoint_count().await, 2);
    }

    #[tokio::test]
    async fn test_list_checkpoints() {
        let saver = InMemoryCheckpointSaver::new();
        let config = thread("thread-1");

        for i in 0..3 {
            let metadata = CheckpointMetadata::new().with_step(i);
            saver
                .put(&config, Checkpoint::empty(), metadata)
                .await
                .unwrap();
        }

        let results = collect(saver.list(Some(&config), None, None, None).await.unwrap()).await;

        assert_eq!(results.len(), 3);
        let steps: Vec<_> = results
            .iter()
            .map(|tuple| tuple.metadata.get("step").cloned().unwrap())
            .collect();
        assert_eq!(steps, vec![json!(2), json!(1), json!(0)]);
        assert!(results.iter().all(|tuple| tuple.pending_writes.is_none()));
    }

    #[tokio::test]
    async fn test_list_filter_before_and_limit() {
        let saver = InMemoryCheckpointSaver::new();
        let config = thread("T1");
        let mut saved = Vec::new();
        for step in 0..5 {
            let source = if step % 2 == 0 {
                CheckpointSource::Loop
            } else {
                CheckpointSource::Update
            };
            let metadata = CheckpointMetadata::new().with_source(source).with_step(step);
            saved.push(saver.put(&config, Checkpoint::empty(), metadata).await.unwrap());
        }

        let mut filter = MetadataFilter::new();
        filter.insert("source".to_string(), json!("loop"));
        let loops = collect(saver.list(Some(&config), Some(filter), None, None).await.unwrap()).await;
        assert_eq!(loops.len(), 3);

        let older = collect(
            saver
                .list(Some(&config), None, Some(&saved[3]), Some(2))
                .await
                .unwrap(),
        )
        .await;
        let ids: Vec<_> = older.iter().map(|t| t.config.clone()).collect();
        assert_eq!(ids, vec![saved[2].clone(), saved[1].clone()]);

        let unknown = thread("T1").with_checkpoint_id("missing");
        let none = collect(saver.list(Some(&config), None, Some(&unknown), None).await.unwrap()).await;
        assert!(none.is_empty());

        let zero = collect(saver.list(Some(&config), None, None, Some(0)).await.unwrap()).await;
        assert!(zero.is_empty());
    }

    #[tokio::test]
    async fn test_empty_thread() {
        let saver = InMemoryCheckpointSaver::new();

        assert!(saver.get_tuple(&thread("nobody")).await.unwrap().is_none());
        assert!(saver.get_tuple(&CheckpointConfig::new()).await.unwrap().is_none());
        assert!(collect(saver.list(Some(&thread("nobody")), None, None, None).await.unwrap())
            .await
            .is_empty());
        assert!(collect(saver.list(None, None, None, None).await.unwrap())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let saver = InMemoryCheckpointSaver::new();
        let ns_a = thread("T1").with_checkpoint_ns("a");
        let ns_b = thread("T1").with_checkpoint_ns("b");

        saver
            .put(&ns_a, Checkpoint::new(json!({"ns": "a"})), CheckpointMetadata::new())
            .await
            .unwrap();

        assert!(saver.get_tuple(&ns_b).await.unwrap().is_none());
        assert!(collect(saver.list(Some(&ns_b), None, None, None).await.unwrap())
            .await
            .is_empty());
        assert!(saver.get_tuple(&ns_a).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let saver = InMemoryCheckpointSaver::new();
        let saved = saver
            .put(&thread("thread-1"), Checkpoint::empty(), CheckpointMetadata::new())
            .await
            .unwrap();
        saver
            .put(&thread("thread-2"), Checkpoint::empty(), CheckpointMetadata::new())
            .await
            .unwrap();
        saver
            .put_writes(&saved, vec![("c".to_string(), json!(1))], "t".to_string())
            .await
            .unwrap();

        assert_eq!(saver.thread_count().await, 2);

        saver.delete_thread("thread-1").await.unwrap();

        assert_eq!(saver.thread_count().await, 1);
        assert!(saver.get_tuple(&saved).await.unwrap().is_none());
        assert!(matches!(
            saver.delete_thread("").await,
            Err(CheckpointError::MissingIdentity)
        ));
    }

    #[tokio::test]
    async fn test_put_writes() {
        let saver = InMemoryCheckpointSaver::new();
        let saved_config = saver
            .put(&thread("thread-1"), Checkpoint::empty(), CheckpointMetadata::new())
            .await
            .unwrap();

        let writes = vec![
            ("channel1".to_string(), json!(42)),
            ("channel2".to_string(), json!("hello")),
        ];
        saver
            .put_writes(&saved_config, writes, "task-2".to_string())
            .await
            .unwrap();
        saver
            .put_writes(&saved_config, vec![("channel3".to_string(), json!(null))], "task-1".to_string())
            .await
            .unwrap();

        let tuple = saver.get_tuple(&saved_config).await.unwrap().unwrap();
        assert_eq!(
            tuple.pending_writes.unwrap(),
            vec![
                PendingWrite::new("task-1", 0, "channel3", json!(null)),
                PendingWrite::new("task-2", 0, "channel1", json!(42)),
                PendingWrite::new("task-2", 1, "channel2", json!("hello")),
            ]
        );
    }

    #[tokio::test]
    async fn test_put_writes_duplicate_is_rejected_atomically() {
        let saver = InMemoryCheckpointSaver::new();
        let saved = saver
            .put(&thread("T1"), Checkpoint::empty(), CheckpointMetadata::new())
            .await
            .unwrap();

        saver
            .put_writes(&saved, vec![("a".to_string(), json!(1))], "task".to_string())
            .await
            .unwrap();
        let result = saver
            .put_writes(
                &saved,
                vec![("b".to_string(), json!(2)), ("c".to_string(), json!(3))],
                "task".to_string(),
            )
            .await;

        assert!(result.unwrap_err().is_constraint_violation());
        let writes = saver.get_tuple(&saved).await.unwrap().unwrap().pending_writes.unwrap();
        assert_eq!(writes, vec![PendingWrite::new("task", 0, "a", json!(1))]);
    }

    #[tokio::test]
    async fn test_put_writes_without_identity_is_noop() {
        let saver = InMemoryCheckpointSaver::new();

        saver
            .put_writes(&thread("T1"), vec![("a".to_string(), json!(1))], "t".to_string())
            .await
            .unwrap();
        saver
            .put_writes(
                &CheckpointConfig::new().with_checkpoint_id("K"),
                vec![("a".to_string(), json!(1))],
                "t".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(saver.checkpoint_count().await, 0);
    }

    #[tokio::test]
    async fn test_writes_staged_before_checkpoint() {
        let saver = InMemoryCheckpointSaver::new();
        let target = thread("T1").with_checkpoint_id("K1");

        saver
            .put_writes(&target, vec![("draft".to_string(), json!("early"))], "task".to_string())
            .await
            .unwrap();

        assert_eq!(saver.thread_count().await, 0);
        assert!(saver.get_tuple(&thread("T1")).await.unwrap().is_none());

        saver
            .put(&thread("T1"), Checkpoint::empty().with_id("K1"), CheckpointMetadata::new())
            .await
            .unwrap();

        let tuple = saver.get_tuple(&target).await.unwrap().unwrap();
        assert_eq!(
            tuple.pending_writes,
            Some(vec![PendingWrite::new("task", 0, "draft", json!("early"))])
        );
    }

    #[tokio::test]
    async fn test_numeric_payload_id_upserts() {
        let saver = InMemoryCheckpointSaver::new();

        for v in 0..2 {
            saver
                .put(&thread("T1"), Checkpoint::new(json!({"id": 5, "v": v})), CheckpointMetadata::new())
                .await
                .unwrap();
        }

        assert_eq!(saver.checkpoint_count().await, 1);
        let tuple = saver.get_tuple(&thread("T1")).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint_id(), Some("5"));
        assert_eq!(tuple.checkpoint.get("v"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_records_carry_payload_encoding() {
        let saver = InMemoryCheckpointSaver::new();
        saver
            .put(&thread("T1"), Checkpoint::empty().with_id("K1"), CheckpointMetadata::new())
            .await
            .unwrap();

        let storage = saver.storage.read().await;
        let record = &storage[&("T1".to_string(), String::new())].records["K1"];
        assert_eq!(record.kind.as_deref(), Some(PAYLOAD_ENCODING));
    }

    #[tokio::test]
    async fn test_clear() {
        let saver = InMemoryCheckpointSaver::new();
        saver
            .put(&thread("thread-1"), Checkpoint::empty(), CheckpointMetadata::new())
            .await
            .unwrap();

        assert_eq!(saver.checkpoint_count().await, 1);

        saver.clear().await;

        assert_eq!(saver.checkpoint_count().await, 0);
    }

    proptest! {
        #[test]
        fn prop_pending_writes_keep_batch_order(channels in proptest::collection::vec("[a-z]{1,8}", 1..16)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let writes = runtime.block_on(async {
                let saver = InMemoryCheckpointSaver::new();
                let saved = saver
                    .put(&thread("T"), Checkpoint::empty(), CheckpointMetadata::new())
                    .await
                    .unwrap();
                let batch = channels
                    .iter()
                    .enumerate()
                    .map(|(i, channel)| (channel.clone(), json!(i)))
                    .collect();
                saver.put_writes(&saved, batch, "task".to_string()).await.unwrap();
                saver.get_tuple(&saved).await.unwrap().unwrap().pending_writes.unwrap()
            });

            prop_assert_eq!(writes.len(), channels.len());
            for (i, write) in writes.iter().enumerate() {
                prop_assert_eq!(write.idx, i as i64);
                prop_assert_eq!(&write.channel, &channels[i]);
            }
        }

        #[test]
        fn prop_reput_replaces_payload(first in any::<i64>(), second in any::<i64>()) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let tuple = runtime.block_on(async {
                let saver = InMemoryCheckpointSaver::new();
                let config = thread("T").with_checkpoint_id("parent");
                saver
                    .put(&config, Checkpoint::new(json!({"v": first})).with_id("k"), CheckpointMetadata::new())
                    .await
                    .unwrap();
                saver
                    .put(&thread("T"), Checkpoint::new(json!({"v": second})).with_id("k"), CheckpointMetadata::new())
                    .await
                    .unwrap();
                saver.get_tuple(&thread("T")).await.unwrap().unwrap()
            });

            prop_assert_eq!(tuple.checkpoint.get("v"), Some(&json!(second)));
            prop_assert_eq!(tuple.parent_checkpoint_id(), Some("parent"));
        }
    }
}
