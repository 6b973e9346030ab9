use super::graph::{Candidate, HnswIndex, Node, MAX_LAYERS};
use rand::rngs::StdRng;
use rand::Rng;
use vecsearch_core::{Document, IndexError, NodeId, Result, VecFloat};

/// Outcome of the read-only half of an insert: the level the new node gets and
/// its own neighbor list per layer (`layers.len() == level + 1`). Applying the
/// same plans in the same order always rebuilds the same graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertPlan {
    pub level: usize,
    pub layers: Vec<Vec<NodeId>>,
}

impl HnswIndex {
    /// Inserts (or re-inserts) a document vector.
    ///
    /// Fails with `DimensionMismatch` before touching any state. Re-inserting a
    /// live id tombstones its previous node.
    pub fn insert(&self, doc_id: &str, vector: &[VecFloat]) -> Result<NodeId> {
        self.insert_with(doc_id, vector, |_, _| Ok(()))
    }

    /// Inserts the vector of `doc`. Text and attributes are ignored here; a
    /// [`Collection`](crate::Collection) indexes them.
    pub fn insert_document(&self, doc: &Document) -> Result<NodeId> {
        self.insert(&doc.id, &doc.vector)
    }

    /// Insert with a journal hook that runs between planning and applying.
    ///
    /// `journal` sees the node id the document will get and the plan. If it
    /// fails, the index is left exactly as it was.
    pub fn insert_with<F>(&self, doc_id: &str, vector: &[VecFloat], journal: F) -> Result<NodeId>
    where
        F: FnOnce(NodeId, &InsertPlan) -> Result<()>,
    {
        self.validate_vector(vector)?;
        let mut rng = self.lock_writer();
        self.ensure_capacity()?;

        let level = self.random_level(&mut rng);
        let plan = self.plan(vector, level);
        let node = self.nodes.count() as NodeId;
        journal(node, &plan)?;
        self.apply(doc_id, vector, &plan)
    }

    /// Re-applies a journaled insert.
    ///
    /// When the recorded node id or plan no longer fits the graph (the journal
    /// was written against a different base), falls back to planning afresh at
    /// the recorded level.
    pub fn replay_insert(
        &self,
        node: NodeId,
        doc_id: &str,
        vector: &[VecFloat],
        plan: &InsertPlan,
    ) -> Result<NodeId> {
        self.validate_vector(vector)?;
        let mut rng = self.lock_writer();
        self.ensure_capacity()?;
        // Keep the generator where the journaled run left it
        skip_level_draw(&mut rng);

        let next = self.nodes.count() as NodeId;
        let fits = node == next
            && plan.layers.len() == plan.level + 1
            && plan.level < MAX_LAYERS
            && plan.layers.iter().flatten().all(|&n| n < next);
        if fits {
            return self.apply(doc_id, vector, plan);
        }

        tracing::warn!(
            doc_id,
            recorded = node,
            next,
            "journaled plan does not fit the graph, re-planning"
        );
        let level = plan.level.min(MAX_LAYERS - 1);
        let fresh = self.plan(vector, level);
        self.apply(doc_id, vector, &fresh)
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.nodes.count() >= NodeId::MAX as usize {
            return Err(IndexError::InvalidParams(format!(
                "index is full ({} nodes)",
                self.nodes.count()
            )));
        }
        Ok(())
    }

    /// Level drawn as `floor(-ln(U) * mL)` with `U` in (0, 1].
    fn random_level(&self, rng: &mut StdRng) -> usize {
        let u: f64 = 1.0 - rng.gen::<f64>();
        let level = (-u.ln() * self.params().level_multiplier()).floor();
        (level as usize).min(MAX_LAYERS - 1)
    }

    /// Max neighbors per node on `layer`. Layer 0 is twice as dense.
    #[inline]
    pub(crate) fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params().m * 2
        } else {
            self.params().m
        }
    }

    /// Read-only half of an insert. Caller holds the writer lock.
    pub(crate) fn plan(&self, vector: &[VecFloat], level: usize) -> InsertPlan {
        let mut layers = vec![Vec::new(); level + 1];
        let Some((entry, max_layer)) = self.entry_point() else {
            return InsertPlan { level, layers };
        };

        let mut curr = entry;
        let mut curr_dist = self.dist_to(entry, vector);

        // 1. Zoom in: greedy descent through the layers above the new node
        for layer in (level + 1..=max_layer).rev() {
            (curr, curr_dist) = self.greedy_closest(curr, curr_dist, vector, layer);
        }

        // 2. Collect neighbors from min(level, max_layer) down to 0
        let ef = self.params().ef_construction;
        for layer in (0..=level.min(max_layer)).rev() {
            let candidates = self.beam_search(curr, vector, ef, layer, |_| true);
            if let Some(closest) = candidates.first() {
                curr = closest.id;
            }
            layers[layer] = self.select_neighbors(&candidates, self.max_degree(layer));
        }

        InsertPlan { level, layers }
    }

    /// Mutating half of an insert. Caller holds the writer lock; the plan has
    /// been validated against the current graph.
    pub(crate) fn apply(&self, doc_id: &str, vector: &[VecFloat], plan: &InsertPlan) -> Result<NodeId> {
        // The store append is the only fallible step and comes first.
        let node = self
            .store
            .append(vector)
            .map_err(|e| IndexError::InvalidVector(e.to_string()))?;
        let pushed = self
            .nodes
            .push(Node::new(doc_id.to_string(), plan.layers.clone(), false));
        debug_assert_eq!(pushed, node as usize, "store and arena out of step");

        // Back-links, pruning any neighbor pushed over its degree bound
        for (layer, neighbors) in plan.layers.iter().enumerate() {
            let max = self.max_degree(layer);
            for &n in neighbors {
                if self.add_link(n, node, layer) > max {
                    self.prune_connections(n, layer, max);
                }
            }
        }

        // All edges are in place: make the node visible to readers
        if let Some(n) = self.nodes.get(node as usize) {
            n.publish();
        }

        match self.entry_point() {
            Some((_, max_layer)) if plan.level <= max_layer => {}
            _ => self.set_entry_point(node, plan.level),
        }

        if let Some(previous) = self.docs.insert(doc_id.to_string(), node) {
            self.deleted.write().insert(previous);
            tracing::debug!(doc_id, previous, node, "document re-inserted");
        }
        Ok(node)
    }

    /// Adds `dst` to `src`'s list on `layer`; returns the new degree.
    fn add_link(&self, src: NodeId, dst: NodeId, layer: usize) -> usize {
        let Some(node) = self.nodes.get(src as usize) else {
            return 0;
        };
        if node.level() < layer {
            return 0;
        }
        let mut links = node.layers[layer].write();
        if !links.contains(&dst) {
            links.push(dst);
        }
        links.len()
    }

    /// Shrinks `node_id`'s list on `layer` back to `max_links` with the same
    /// heuristic used on insert.
    fn prune_connections(&self, node_id: NodeId, layer: usize, max_links: usize) {
        let Some(node) = self.nodes.get(node_id as usize) else {
            return;
        };
        let current: Vec<NodeId> = node.layers[layer].read().clone();

        let mut candidates: Vec<Candidate> = current
            .iter()
            .map(|&n| Candidate {
                id: n,
                distance: self.dist_nodes(node_id, n),
            })
            .collect();
        candidates.sort_unstable();

        let keepers = self.select_neighbors(&candidates, max_links);
        *node.layers[layer].write() = keepers;
    }

    /// HNSW heuristic for neighbor selection.
    ///
    /// `candidates` ascend by distance to the base point. A candidate is kept
    /// when it is closer to the base than to every neighbor kept so far, which
    /// spreads links across directions instead of into one cluster. Slots left
    /// over are back-filled with the closest discarded candidates.
    pub(crate) fn select_neighbors(&self, candidates: &[Candidate], m: usize) -> Vec<NodeId> {
        let mut result: Vec<NodeId> = Vec::with_capacity(m);
        let mut discarded: Vec<NodeId> = Vec::new();

        for cand in candidates {
            if result.len() >= m {
                break;
            }
            let diverse = result
                .iter()
                .all(|&kept| self.dist_nodes(cand.id, kept) >= cand.distance);
            if diverse {
                result.push(cand.id);
            } else {
                discarded.push(cand.id);
            }
        }

        for id in discarded {
            if result.len() >= m {
                break;
            }
            result.push(id);
        }
        result
    }
}

/// Consumes the draw an insert would have made.
pub(crate) fn skip_level_draw(rng: &mut StdRng) {
    let _: f64 = rng.gen();
}
