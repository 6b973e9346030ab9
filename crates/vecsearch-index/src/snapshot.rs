//! Point-in-time image of a collection, archived with rkyv.
//!
//! The snapshot stores the fully materialised adjacency, so loading it never
//! re-runs graph construction. The file is memory-mapped and validated before
//! anything is deserialised.

use crate::hnsw::{HnswIndex, RestoredNode};
use rkyv::{Archive, Deserialize, Serialize};
use roaring::RoaringBitmap;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use vecsearch_core::{IndexError, IndexParams, Metric, NodeId, Result, VecFloat};

#[derive(Archive, Deserialize, Serialize)]
#[archive(check_bytes)]
pub struct SnapshotData {
    /// Matches the log's checkpoint marker for this snapshot.
    pub generation: u64,
    pub dimension: u64,
    pub metric: String,
    pub m: u64,
    pub ef_construction: u64,
    pub seed: u64,
    pub has_entry: bool,
    pub entry_point: u32,
    pub max_layer: u32,
    pub nodes: Vec<SnapshotNode>,
    // Serialized RoaringBitmap of tombstoned nodes
    pub deleted: Vec<u8>,
}

#[derive(Archive, Deserialize, Serialize)]
#[archive(check_bytes)]
pub struct SnapshotNode {
    pub doc_id: String,
    pub text: String,
    pub attributes: Vec<(String, String)>,
    pub vector: Vec<VecFloat>,
    pub layers: Vec<Vec<u32>>,
}

/// Payload stored next to a node: text and attributes.
pub type NodePayload = (String, HashMap<String, String>);

/// Everything needed to rebuild a collection.
pub(crate) struct SnapshotParts {
    pub(crate) params: IndexParams,
    pub(crate) nodes: Vec<RestoredNode>,
    pub(crate) payloads: Vec<NodePayload>,
    pub(crate) deleted: RoaringBitmap,
    pub(crate) entry: Option<(NodeId, usize)>,
    pub(crate) generation: u64,
}

impl SnapshotData {
    /// Copies the graph out of `index`. `payload` supplies each node's text and
    /// attributes. Caller must keep writers out for the duration.
    pub fn capture<F>(index: &HnswIndex, generation: u64, payload: F) -> Result<Self>
    where
        F: Fn(NodeId) -> NodePayload,
    {
        let params = index.params();
        let count = index.node_count();
        let mut nodes = Vec::with_capacity(count);
        for id in 0..count as NodeId {
            let (Some(doc_id), Some(vector), Some(layers)) =
                (index.doc_id(id), index.vector_of(id), index.adjacency(id))
            else {
                return Err(IndexError::Snapshot(format!("node {id} is incomplete")));
            };
            let (text, attributes) = payload(id);
            let mut attributes: Vec<(String, String)> = attributes.into_iter().collect();
            attributes.sort();
            nodes.push(SnapshotNode {
                doc_id: doc_id.to_string(),
                text,
                attributes,
                vector: vector.to_vec(),
                layers,
            });
        }

        let mut deleted = Vec::new();
        index
            .deleted
            .read()
            .serialize_into(&mut deleted)
            .map_err(|e| IndexError::Snapshot(e.to_string()))?;

        let entry = index.entry_point();
        Ok(Self {
            generation,
            dimension: params.dimension as u64,
            metric: params.metric.name().to_string(),
            m: params.m as u64,
            ef_construction: params.ef_construction as u64,
            seed: params.seed,
            has_entry: entry.is_some(),
            entry_point: entry.map_or(0, |(n, _)| n),
            max_layer: entry.map_or(0, |(_, l)| l as u32),
            nodes,
            deleted,
        })
    }

    /// Writes to a temp file next to `path`, syncs, then renames over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = rkyv::to_bytes::<_, 1024>(self)
            .map_err(|e| IndexError::Snapshot(e.to_string()))?;

        let tmp = path.with_extension("snap.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        tracing::info!(
            path = %path.display(),
            nodes = self.nodes.len(),
            bytes = bytes.len(),
            "snapshot written"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the snapshot is only replaced by rename, never rewritten in
        // place, so the mapped bytes stay stable while they are read.
        let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };
        let archived = rkyv::check_archived_root::<SnapshotData>(&mmap[..])
            .map_err(|e| IndexError::Snapshot(format!("corrupt snapshot: {e}")))?;
        archived
            .deserialize(&mut rkyv::Infallible)
            .map_err(|e| IndexError::Snapshot(format!("{e:?}")))
    }

    pub(crate) fn into_parts(self) -> Result<SnapshotParts> {
        let metric: Metric = self.metric.parse().map_err(IndexError::Snapshot)?;
        let params = IndexParams {
            dimension: to_usize(self.dimension)?,
            metric,
            m: to_usize(self.m)?,
            ef_construction: to_usize(self.ef_construction)?,
            seed: self.seed,
        };
        let deleted = RoaringBitmap::deserialize_from(&self.deleted[..])
            .map_err(|e| IndexError::Snapshot(format!("tombstone bitmap: {e}")))?;

        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut payloads = Vec::with_capacity(self.nodes.len());
        for n in self.nodes {
            nodes.push(RestoredNode {
                doc_id: n.doc_id,
                vector: n.vector,
                layers: n.layers,
            });
            payloads.push((n.text, n.attributes.into_iter().collect()));
        }

        let entry = self
            .has_entry
            .then_some((self.entry_point, self.max_layer as usize));
        Ok(SnapshotParts {
            params,
            nodes,
            payloads,
            deleted,
            entry,
            generation: self.generation,
        })
    }
}

fn to_usize(v: u64) -> Result<usize> {
    usize::try_from(v).map_err(|_| IndexError::Snapshot(format!("value {v} overflows usize")))
}
