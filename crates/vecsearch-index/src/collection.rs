//! A durable collection: graph, attributes, keyword index and payloads kept
//! in step, with every mutation journaled to the write-ahead log before it is
//! applied.
//!
//! On-disk layout of a data directory:
//!
//! ```text
//! <dir>/index.snap   rkyv snapshot of the last checkpoint
//! <dir>/wal.log      inserts and deletes since that checkpoint
//! ```

use crate::attributes::AttributeIndex;
use crate::hnsw::HnswIndex;
use crate::lexical::KeywordIndex;
use crate::planner::QueryPlanner;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vecsearch_core::{
    Document, GlobalConfig, IndexError, IndexParams, Metric, NodeId, Result, SearchHit,
};
use vecsearch_store::wal::{InsertRecord, Wal, WalEntry, WalSyncMode};

pub const WAL_FILE: &str = "wal.log";
pub const SNAPSHOT_FILE: &str = "index.snap";

#[derive(Debug, Clone, Default)]
struct Payload {
    text: String,
    attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub documents: usize,
    pub nodes: usize,
    pub deleted: usize,
    pub max_layer: Option<usize>,
    pub dimension: usize,
    pub metric: Metric,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub lexical_docs: usize,
    pub lexical_terms: usize,
    pub attribute_tags: usize,
    pub vector_bytes: usize,
    pub searches: u64,
}

#[derive(Debug)]
pub struct Collection {
    index: HnswIndex,
    attributes: AttributeIndex,
    lexical: RwLock<KeywordIndex>,
    // Index in arena = NodeId.
    payloads: boxcar::Vec<Payload>,
    // Serialises writers. `None` for in-memory collections.
    wal: Mutex<Option<Wal>>,
    // Generation of the snapshot the collection was loaded from or last wrote
    generation: AtomicU64,
    dir: Option<PathBuf>,
}

impl Collection {
    /// A collection without a data directory. Nothing is journaled.
    pub fn in_memory(params: IndexParams, config: Arc<GlobalConfig>) -> Result<Self> {
        Ok(Self::from_index(HnswIndex::new(params, config)?, None))
    }

    fn from_index(index: HnswIndex, dir: Option<PathBuf>) -> Self {
        Self {
            index,
            attributes: AttributeIndex::new(),
            lexical: RwLock::new(KeywordIndex::new()),
            payloads: boxcar::Vec::new(),
            wal: Mutex::new(None),
            generation: AtomicU64::new(0),
            dir,
        }
    }

    /// Opens (or creates) a collection in `dir`.
    ///
    /// Loads the snapshot if there is one, replays the log on top and keeps the
    /// log open for appends. A snapshot's persisted parameters win over
    /// `params`, except that a different dimension is an error.
    #[cfg(feature = "persistence")]
    pub fn open(
        dir: &Path,
        params: IndexParams,
        config: Arc<GlobalConfig>,
        sync: WalSyncMode,
    ) -> Result<Self> {
        use crate::snapshot::SnapshotData;

        std::fs::create_dir_all(dir)?;
        let snap_path = dir.join(SNAPSHOT_FILE);
        let wal_path = dir.join(WAL_FILE);

        let collection = if snap_path.exists() {
            let parts = SnapshotData::load(&snap_path)?.into_parts()?;
            if parts.params.dimension != params.dimension {
                return Err(IndexError::InvalidParams(format!(
                    "snapshot has dimension {}, requested {}",
                    parts.params.dimension, params.dimension
                )));
            }
            if parts.params != params {
                tracing::warn!(
                    persisted = ?parts.params,
                    requested = ?params,
                    "using persisted index parameters"
                );
            }
            let index = HnswIndex::restore(parts.params, config, parts.nodes, parts.deleted, parts.entry)?;
            let collection = Self::from_index(index, Some(dir.to_path_buf()));
            collection.generation.store(parts.generation, Ordering::Relaxed);
            for (node, (text, attributes)) in parts.payloads.into_iter().enumerate() {
                let node = node as NodeId;
                if collection.index.is_live(node) {
                    collection.attributes.insert(node, &attributes);
                    collection.lexical.write().add(node, &text);
                }
                collection.payloads.push(Payload { text, attributes });
            }
            tracing::info!(
                path = %snap_path.display(),
                documents = collection.len(),
                "snapshot loaded"
            );
            collection
        } else {
            Self::from_index(HnswIndex::new(params, config)?, Some(dir.to_path_buf()))
        };

        collection.recover(&wal_path)?;
        *collection.wal.lock() = Some(Wal::new(&wal_path, sync).map_err(IndexError::Wal)?);
        Ok(collection)
    }

    #[cfg(feature = "persistence")]
    fn recover(&self, wal_path: &Path) -> Result<()> {
        let mut entries = Vec::new();
        Wal::replay(wal_path, |e| entries.push(e)).map_err(IndexError::Wal)?;
        if entries.is_empty() {
            return Ok(());
        }

        // Records up to this snapshot's marker are already in it. They remain
        // when a checkpoint could not truncate the log.
        let generation = self.generation.load(Ordering::Relaxed);
        let start = entries
            .iter()
            .rposition(|e| matches!(e, WalEntry::Checkpoint { generation: g } if *g == generation))
            .filter(|_| generation > 0)
            .map_or(0, |i| i + 1);
        if start > 0 {
            tracing::info!(skipped = start, generation, "log prefix already in snapshot");
        }

        let mut applied = 0usize;
        for entry in entries.into_iter().skip(start) {
            let outcome = match entry {
                WalEntry::Insert(rec) => self.replay_insert(rec).map(|_| ()),
                WalEntry::Delete { id } => {
                    self.apply_delete(&id);
                    Ok(())
                }
                // Marker of a checkpoint whose snapshot never landed
                WalEntry::Checkpoint { .. } => continue,
            };
            match outcome {
                Ok(()) => applied += 1,
                Err(e) => tracing::warn!(error = %e, "skipping unreplayable log record"),
            }
        }
        tracing::info!(applied, documents = self.len(), "write-ahead log replayed");
        Ok(())
    }

    #[cfg(feature = "persistence")]
    fn replay_insert(&self, rec: InsertRecord) -> Result<NodeId> {
        let plan = crate::hnsw::InsertPlan {
            level: rec.level as usize,
            layers: rec.layers,
        };
        let previous = self.index.node_of(&rec.id);
        let node = self.index.replay_insert(rec.node, &rec.id, &rec.vector, &plan)?;
        self.attach(node, previous, rec.text, rec.attributes);
        Ok(node)
    }

    pub fn index(&self) -> &HnswIndex {
        &self.index
    }

    pub fn attributes(&self) -> &AttributeIndex {
        &self.attributes
    }

    pub fn config(&self) -> &Arc<GlobalConfig> {
        &self.index.config
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn planner(&self) -> QueryPlanner<'_> {
        QueryPlanner::new(&self.index, &self.attributes).with_lexical(&self.lexical)
    }

    /// Journals and applies one document. Re-inserting a live id replaces it.
    pub fn insert(&self, doc: Document) -> Result<NodeId> {
        let mut wal = self.wal.lock();
        let previous = self.index.node_of(&doc.id);
        let Document {
            id,
            text,
            vector,
            attributes,
        } = doc;

        let node = self.index.insert_with(&id, &vector, |node, plan| {
            let Some(wal) = wal.as_mut() else {
                return Ok(());
            };
            let record = InsertRecord {
                node,
                id: id.clone(),
                text: text.clone(),
                level: plan.level as u32,
                vector: vector.clone(),
                attributes: attributes.clone(),
                layers: plan.layers.clone(),
            };
            wal.append(&WalEntry::Insert(record)).map_err(IndexError::Wal)
        })?;

        self.attach(node, previous, text, attributes);
        Ok(node)
    }

    /// Inserts in order, stopping at the first failure. Returns how many went in.
    pub fn insert_batch(&self, docs: Vec<Document>) -> Result<usize> {
        let mut done = 0;
        for doc in docs {
            self.insert(doc)?;
            done += 1;
        }
        Ok(done)
    }

    // Indexes the payload of a freshly applied node. Caller holds the writer.
    fn attach(
        &self,
        node: NodeId,
        previous: Option<NodeId>,
        text: String,
        attributes: HashMap<String, String>,
    ) {
        if let Some(prev) = previous {
            self.attributes.remove(prev);
            self.lexical.write().remove(prev);
        }
        self.attributes.insert(node, &attributes);
        self.lexical.write().add(node, &text);
        let slot = self.payloads.push(Payload { text, attributes });
        debug_assert_eq!(slot, node as usize, "payloads out of step with nodes");
    }

    /// Journals and applies a delete. `Ok(false)` when the id is not live.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut wal = self.wal.lock();
        if !self.index.contains(id) {
            return Ok(false);
        }
        if let Some(wal) = wal.as_mut() {
            wal.append(&WalEntry::Delete { id: id.to_string() })
                .map_err(IndexError::Wal)?;
        }
        Ok(self.apply_delete(id))
    }

    fn apply_delete(&self, id: &str) -> bool {
        let Some(node) = self.index.node_of(id) else {
            return false;
        };
        if !self.index.delete(id) {
            return false;
        }
        self.attributes.remove(node);
        self.lexical.write().remove(node);
        true
    }

    /// Writes a snapshot and truncates the log.
    #[cfg(feature = "persistence")]
    pub fn checkpoint(&self) -> Result<()> {
        let Some(dir) = self.dir.as_deref() else {
            return Err(IndexError::InvalidParams(
                "in-memory collection has no data directory".into(),
            ));
        };
        let mut wal = self.wal.lock();
        self.write_snapshot(dir, &mut wal)?;
        if let Some(wal) = wal.as_mut() {
            wal.truncate().map_err(IndexError::Wal)?;
        }
        tracing::info!(documents = self.len(), "checkpoint complete");
        Ok(())
    }

    // Marks the log, then saves the snapshot for the next generation. Caller
    // holds the writer lock.
    #[cfg(feature = "persistence")]
    fn write_snapshot(&self, dir: &Path, wal: &mut Option<Wal>) -> Result<()> {
        use crate::snapshot::SnapshotData;

        let generation = self.generation.load(Ordering::Relaxed) + 1;
        if let Some(wal) = wal.as_mut() {
            wal.append(&WalEntry::Checkpoint { generation })
                .map_err(IndexError::Wal)?;
            wal.sync().map_err(IndexError::Wal)?;
        }
        let data = SnapshotData::capture(&self.index, generation, |node| {
            self.payloads
                .get(node as usize)
                .map(|p| (p.text.clone(), p.attributes.clone()))
                .unwrap_or_default()
        })?;
        data.save(&dir.join(SNAPSHOT_FILE))?;
        self.generation.store(generation, Ordering::Relaxed);
        Ok(())
    }

    /// Flushes and fsyncs the log.
    pub fn sync(&self) -> Result<()> {
        if let Some(wal) = self.wal.lock().as_mut() {
            wal.sync().map_err(IndexError::Wal)?;
        }
        Ok(())
    }

    /// A live document, reassembled.
    pub fn get(&self, id: &str) -> Option<Document> {
        let node = self.index.node_of(id)?;
        let vector = self.index.vector(id)?.to_vec();
        let payload = self.payloads.get(node as usize).cloned().unwrap_or_default();
        Some(Document {
            id: id.to_string(),
            text: payload.text,
            vector,
            attributes: payload.attributes,
        })
    }

    /// BM25 hits on live documents.
    pub fn lexical_search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        self.lexical
            .read()
            .search(query, k)
            .into_iter()
            .filter(|(node, _)| self.index.is_live(*node))
            .filter_map(|(node, score)| self.index.doc_id(node).map(|id| SearchHit::new(id, score)))
            .collect()
    }

    pub fn stats(&self) -> CollectionStats {
        let params = self.index.params();
        let lexical = self.lexical.read();
        CollectionStats {
            documents: self.index.len(),
            nodes: self.index.node_count(),
            deleted: self.index.deleted_count(),
            max_layer: self.index.max_layer(),
            dimension: params.dimension,
            metric: params.metric,
            m: params.m,
            ef_construction: params.ef_construction,
            ef_search: self.index.config.get_ef_search(),
            lexical_docs: lexical.doc_count(),
            lexical_terms: lexical.term_count(),
            attribute_tags: self.attributes.tag_count(),
            vector_bytes: self.index.vector_bytes(),
            searches: self.index.config.get_searches(),
        }
    }
}

#[cfg(all(test, feature = "persistence"))]
mod tests {
    use super::*;

    fn open(dir: &Path) -> Collection {
        Collection::open(
            dir,
            IndexParams::new(2, Metric::L2),
            Arc::new(GlobalConfig::new()),
            WalSyncMode::Strict,
        )
        .unwrap()
    }

    fn doc(i: usize) -> Document {
        let x = i as f64;
        Document::new(i.to_string(), vec![x, (x * 0.5).sin()])
    }

    #[test]
    fn test_writes_after_untruncated_checkpoint_survive() {
        let dir = tempfile::tempdir().unwrap();
        {
            let c = open(dir.path());
            for i in 0..10 {
                c.insert(doc(i)).unwrap();
            }
            // Snapshot lands but the log keeps its records
            c.write_snapshot(dir.path(), &mut c.wal.lock()).unwrap();
            for i in 10..15 {
                c.insert(doc(i)).unwrap();
            }
            assert!(c.delete("3").unwrap());
        }

        let c = open(dir.path());
        assert_eq!(c.len(), 14);
        assert!(c.get("12").is_some());
        assert!(c.get("3").is_none());
        assert_eq!(c.index().node_count(), 15);
    }

    #[test]
    fn test_crash_before_truncate_skips_covered_records() {
        let dir = tempfile::tempdir().unwrap();
        {
            let c = open(dir.path());
            for i in 0..10 {
                c.insert(doc(i)).unwrap();
            }
            c.delete("4").unwrap();
            c.write_snapshot(dir.path(), &mut c.wal.lock()).unwrap();
        }

        let c = open(dir.path());
        assert_eq!(c.len(), 9);
        assert_eq!(c.index().node_count(), 10);
        assert!(c.get("4").is_none());
    }

    #[test]
    fn test_marker_without_snapshot_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        {
            let c = open(dir.path());
            c.insert(doc(0)).unwrap();
            // Marker for a snapshot that was never saved
            c.wal
                .lock()
                .as_mut()
                .unwrap()
                .append(&WalEntry::Checkpoint { generation: 1 })
                .unwrap();
            c.insert(doc(1)).unwrap();
        }
        assert_eq!(open(dir.path()).len(), 2);
    }
}
