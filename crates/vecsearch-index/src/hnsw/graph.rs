use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use roaring::RoaringBitmap;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use vecsearch_core::{
    DocId, GlobalConfig, IndexError, IndexParams, Metric, NodeId, Result, VecFloat,
};
use vecsearch_store::VectorStore;

/// Hard cap on the number of layers a node can be assigned.
pub const MAX_LAYERS: usize = 16;

const NO_ENTRY: u64 = u64::MAX;

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) doc_id: DocId,
    // Neighbor lists by layer. layers[0] is the dense bottom layer.
    pub(crate) layers: Vec<RwLock<Vec<NodeId>>>,
    // Set once every edge of the node is installed.
    published: AtomicBool,
}

impl Node {
    pub(crate) fn new(doc_id: DocId, layers: Vec<Vec<NodeId>>, published: bool) -> Self {
        Self {
            doc_id,
            layers: layers.into_iter().map(RwLock::new).collect(),
            published: AtomicBool::new(published),
        }
    }

    #[inline]
    pub(crate) fn level(&self) -> usize {
        self.layers.len().saturating_sub(1)
    }

    #[inline]
    pub(crate) fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self) {
        self.published.store(true, Ordering::Release);
    }
}

/// Nearest neighbor candidate. Ordered by distance, then node id, so heaps and
/// sorts are deterministic even with equal distances.
#[derive(Debug, Copy, Clone, PartialEq)]
pub(crate) struct Candidate {
    pub(crate) id: NodeId,
    pub(crate) distance: VecFloat,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Hierarchical Navigable Small World index over one vector space.
///
/// Nodes live in an append-only arena and refer to each other by [`NodeId`].
/// Readers never take a global lock: they read the arena, the vector store and
/// one adjacency list at a time. Writers (insert, delete) are serialised by a
/// single mutex, which also owns the level generator.
#[derive(Debug)]
pub struct HnswIndex {
    params: IndexParams,

    // Runtime configuration
    pub config: Arc<GlobalConfig>,

    // Raw vectors. Index in store = NodeId.
    pub(crate) store: VectorStore,

    // Topology. Index in arena = NodeId.
    pub(crate) nodes: boxcar::Vec<Node>,

    // Live document id -> node.
    pub(crate) docs: DashMap<DocId, NodeId>,

    // Tombstones: deleted or superseded nodes. Still traversed, never returned.
    pub(crate) deleted: RwLock<RoaringBitmap>,

    // Packed (max_layer << 32 | entry node), NO_ENTRY while empty.
    entry: AtomicU64,

    pub(crate) writer: Mutex<StdRng>,
}

impl HnswIndex {
    pub fn new(params: IndexParams, config: Arc<GlobalConfig>) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            store: VectorStore::new(params.dimension),
            nodes: boxcar::Vec::new(),
            docs: DashMap::new(),
            deleted: RwLock::new(RoaringBitmap::new()),
            entry: AtomicU64::new(NO_ENTRY),
            writer: Mutex::new(StdRng::seed_from_u64(params.seed)),
            params,
            config,
        })
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    pub fn dimension(&self) -> usize {
        self.params.dimension
    }

    pub fn metric(&self) -> Metric {
        self.params.metric
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Number of nodes ever created, tombstones included.
    pub fn node_count(&self) -> usize {
        self.nodes.count()
    }

    /// Bytes held by stored vectors.
    pub fn vector_bytes(&self) -> usize {
        self.store.total_size_bytes()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.read().len() as usize
    }

    pub fn max_layer(&self) -> Option<usize> {
        self.entry_point().map(|(_, layer)| layer)
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.docs.contains_key(doc_id)
    }

    pub fn node_of(&self, doc_id: &str) -> Option<NodeId> {
        self.docs.get(doc_id).map(|n| *n)
    }

    pub fn doc_id(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node as usize).map(|n| n.doc_id.as_str())
    }

    /// Stored vector of a live document.
    pub fn vector(&self, doc_id: &str) -> Option<&[VecFloat]> {
        self.node_of(doc_id).and_then(|n| self.store.get(n))
    }

    pub(crate) fn vector_of(&self, node: NodeId) -> Option<&[VecFloat]> {
        self.store.get(node)
    }

    /// Published and not tombstoned.
    pub fn is_live(&self, node: NodeId) -> bool {
        self.nodes.get(node as usize).is_some_and(Node::is_published)
            && !self.deleted.read().contains(node)
    }

    /// Bitmap of every live node.
    pub fn live_nodes(&self) -> RoaringBitmap {
        self.docs.iter().map(|e| *e.value()).collect()
    }

    #[inline]
    pub(crate) fn entry_point(&self) -> Option<(NodeId, usize)> {
        let packed = self.entry.load(Ordering::Acquire);
        if packed == NO_ENTRY {
            None
        } else {
            Some((packed as u32, (packed >> 32) as usize))
        }
    }

    pub(crate) fn set_entry_point(&self, node: NodeId, layer: usize) {
        let packed = ((layer as u64) << 32) | u64::from(node);
        self.entry.store(packed, Ordering::Release);
    }

    /// Rejects vectors that could never be indexed. Runs before any mutation.
    pub fn validate_vector(&self, vector: &[VecFloat]) -> Result<()> {
        if vector.len() != self.params.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.params.dimension,
                actual: vector.len(),
            });
        }
        if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
            return Err(IndexError::InvalidVector(format!(
                "component {pos} is not finite"
            )));
        }
        Ok(())
    }

    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, StdRng> {
        self.writer.lock()
    }

    /// Tombstones a document. Its node stays in the graph for navigation.
    /// Returns `false` if the id is not live.
    pub fn delete(&self, doc_id: &str) -> bool {
        let _writer = self.lock_writer();
        self.delete_locked(doc_id)
    }

    pub(crate) fn delete_locked(&self, doc_id: &str) -> bool {
        match self.docs.remove(doc_id) {
            Some((_, node)) => {
                self.deleted.write().insert(node);
                tracing::debug!(doc_id, node, "document tombstoned");
                true
            }
            None => false,
        }
    }

    /// Distance between two stored nodes.
    #[inline]
    pub(crate) fn dist_nodes(&self, a: NodeId, b: NodeId) -> VecFloat {
        match (self.store.get(a), self.store.get(b)) {
            (Some(va), Some(vb)) => self.params.metric.distance(va, vb),
            _ => VecFloat::INFINITY,
        }
    }

    /// Distance from a stored node to a query vector.
    #[inline]
    pub(crate) fn dist_to(&self, node: NodeId, query: &[VecFloat]) -> VecFloat {
        self.store
            .get(node)
            .map_or(VecFloat::INFINITY, |v| self.params.metric.distance(v, query))
    }

    /// Copy of a node's neighbor lists, bottom layer first.
    pub(crate) fn adjacency(&self, node: NodeId) -> Option<Vec<Vec<NodeId>>> {
        self.nodes
            .get(node as usize)
            .map(|n| n.layers.iter().map(|l| l.read().clone()).collect())
    }

    /// Live neighbors of a document on one layer.
    pub fn neighbors(&self, doc_id: &str, layer: usize) -> Result<Vec<DocId>> {
        let node = self
            .node_of(doc_id)
            .ok_or_else(|| IndexError::UnknownDocument(doc_id.to_string()))?;
        let Some(n) = self.nodes.get(node as usize) else {
            return Err(IndexError::UnknownDocument(doc_id.to_string()));
        };
        if layer > n.level() {
            return Ok(Vec::new());
        }
        let deleted = self.deleted.read();
        let out = n.layers[layer]
            .read()
            .iter()
            .filter(|id| !deleted.contains(**id))
            .filter_map(|&id| self.doc_id(id).map(str::to_string))
            .collect();
        Ok(out)
    }

    /// Rebuilds an index from persisted parts. Nodes must be in id order and
    /// every neighbor reference must point at an earlier or later node of the
    /// same set.
    pub(crate) fn restore(
        params: IndexParams,
        config: Arc<GlobalConfig>,
        nodes: Vec<RestoredNode>,
        deleted: RoaringBitmap,
        entry: Option<(NodeId, usize)>,
    ) -> Result<Self> {
        let index = Self::new(params, config)?;
        let total = nodes.len();
        for (i, node) in nodes.into_iter().enumerate() {
            index.validate_vector(&node.vector)?;
            if node.layers.is_empty() || node.layers.len() > MAX_LAYERS {
                return Err(IndexError::Snapshot(format!(
                    "node {i} has {} layers",
                    node.layers.len()
                )));
            }
            if let Some(bad) = node.layers.iter().flatten().find(|&&n| n as usize >= total) {
                return Err(IndexError::Snapshot(format!(
                    "node {i} links to missing node {bad}"
                )));
            }
            let id = index
                .store
                .append(&node.vector)
                .map_err(|e| IndexError::Snapshot(e.to_string()))?;
            index.nodes.push(Node::new(node.doc_id.clone(), node.layers, true));
            if !deleted.contains(id) {
                index.docs.insert(node.doc_id, id);
            }
        }
        if let Some((ep, layer)) = entry {
            let valid = index
                .nodes
                .get(ep as usize)
                .is_some_and(|n| n.level() == layer);
            if !valid {
                return Err(IndexError::Snapshot(format!(
                    "entry point {ep} at layer {layer} does not match the graph"
                )));
            }
            index.set_entry_point(ep, layer);
        } else if total > 0 {
            return Err(IndexError::Snapshot("non-empty graph without entry point".into()));
        }
        *index.deleted.write() = deleted;
        {
            let mut rng = index.lock_writer();
            for _ in 0..total {
                super::insert::skip_level_draw(&mut rng);
            }
        }
        Ok(index)
    }
}

/// One node as read back from a snapshot.
#[derive(Debug, Clone)]
pub(crate) struct RestoredNode {
    pub(crate) doc_id: DocId,
    pub(crate) vector: Vec<VecFloat>,
    pub(crate) layers: Vec<Vec<NodeId>>,
}
