use super::graph::{Candidate, HnswIndex};
use super::visited::with_scratch;
use rayon::prelude::*;
use roaring::RoaringBitmap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use vecsearch_core::types::sort_hits;
use vecsearch_core::{NodeId, Result, SearchHit, VecFloat};

impl HnswIndex {
    /// Approximate top-`k` search.
    ///
    /// Descends from the entry point with greedy single-best steps, then runs a
    /// beam of width `max(ef, k)` on layer 0. Results are ordered by score
    /// descending, ties by document id ascending.
    pub fn search(&self, query: &[VecFloat], k: usize, ef: usize) -> Result<Vec<SearchHit>> {
        self.validate_vector(query)?;
        self.config.inc_searches();
        let found = self.search_nodes(query, k, ef);
        Ok(self.to_hits(&found, k))
    }

    /// Search with the index-wide default beam width.
    pub fn search_default(&self, query: &[VecFloat], k: usize) -> Result<Vec<SearchHit>> {
        self.search(query, k, self.config.get_ef_search())
    }

    /// Runs independent searches in parallel.
    pub fn search_batch(
        &self,
        queries: &[Vec<VecFloat>],
        k: usize,
        ef: usize,
    ) -> Vec<Result<Vec<SearchHit>>> {
        queries
            .par_iter()
            .map(|q| self.search(q, k, ef))
            .collect()
    }

    /// Brute-force top-`k` over `allowed` (every live node when `None`).
    pub fn search_exact(
        &self,
        query: &[VecFloat],
        k: usize,
        allowed: Option<&RoaringBitmap>,
    ) -> Result<Vec<SearchHit>> {
        self.validate_vector(query)?;
        self.config.inc_searches();
        let scored: Vec<Candidate> = match allowed {
            Some(bitmap) => bitmap
                .iter()
                .filter(|&n| self.is_live(n))
                .map(|n| Candidate {
                    id: n,
                    distance: self.dist_to(n, query),
                })
                .collect(),
            None => self
                .docs
                .iter()
                .map(|e| *e.value())
                .filter(|&n| self.is_live(n))
                .map(|n| Candidate {
                    id: n,
                    distance: self.dist_to(n, query),
                })
                .collect(),
        };
        Ok(self.to_hits(&scored, k))
    }

    /// Exact distance from a live node to `query`.
    pub fn exact_distance(&self, node: NodeId, query: &[VecFloat]) -> Option<VecFloat> {
        if !self.is_live(node) || query.len() != self.dimension() {
            return None;
        }
        Some(self.dist_to(node, query))
    }

    /// Maps candidates to ranked hits, truncated to `k`.
    pub(crate) fn to_hits(&self, found: &[Candidate], k: usize) -> Vec<SearchHit> {
        let metric = self.metric();
        let mut hits: Vec<SearchHit> = found
            .iter()
            .filter_map(|c| {
                let id = self.doc_id(c.id)?;
                Some(SearchHit {
                    id: id.to_string(),
                    score: metric.score(c.distance),
                    distance: Some(c.distance),
                })
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        hits
    }

    /// The `max(ef, k)` closest live nodes found, ascending by distance, plus
    /// ties at the cutoff.
    pub(crate) fn search_nodes(&self, query: &[VecFloat], k: usize, ef: usize) -> Vec<Candidate> {
        if k == 0 {
            return Vec::new();
        }
        let Some((entry, top_layer)) = self.entry_point() else {
            return Vec::new();
        };

        // 1. Zoom-in phase: greedy search from the top down to layer 1
        let mut curr = entry;
        let mut curr_dist = self.dist_to(entry, query);
        for layer in (1..=top_layer).rev() {
            (curr, curr_dist) = self.greedy_closest(curr, curr_dist, query, layer);
        }

        // 2. Beam search on layer 0, only live nodes make it into results
        let deleted = self.deleted.read();
        self.beam_search(curr, query, ef.max(k), 0, |n| !deleted.contains(n))
    }

    /// Follows the single best neighbor on `layer` until no neighbor improves.
    pub(crate) fn greedy_closest(
        &self,
        start: NodeId,
        start_dist: VecFloat,
        query: &[VecFloat],
        layer: usize,
    ) -> (NodeId, VecFloat) {
        let mut curr = start;
        let mut curr_dist = start_dist;
        let mut changed = true;
        while changed {
            changed = false;
            let Some(node) = self.nodes.get(curr as usize) else {
                break;
            };
            if node.level() < layer {
                break;
            }
            let neighbors = node.layers[layer].read();
            for &n in neighbors.iter() {
                if !self.nodes.get(n as usize).is_some_and(|x| x.is_published()) {
                    continue;
                }
                let d = self.dist_to(n, query);
                if d < curr_dist || (d == curr_dist && n < curr) {
                    curr_dist = d;
                    curr = n;
                    changed = true;
                }
            }
        }
        (curr, curr_dist)
    }

    /// Bounded beam search on one layer.
    ///
    /// Every published node reachable through the beam may be expanded, but
    /// only nodes passing `accept` enter the result set, so traversal can pass
    /// through tombstones. The width is capped at the node count. Returns the
    /// `ef` closest accepted nodes ascending by distance, plus any node tied
    /// with the last of them, so callers can break ties by document id.
    pub(crate) fn beam_search<F>(
        &self,
        start: NodeId,
        query: &[VecFloat],
        ef: usize,
        layer: usize,
        accept: F,
    ) -> Vec<Candidate>
    where
        F: Fn(NodeId) -> bool,
    {
        let ef = ef.min(self.nodes.count()).max(1);
        with_scratch(self.nodes.count(), |scratch| {
            let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
            let mut results: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef + 1);
            // Evicted nodes at exactly the current worst distance
            let mut boundary: Vec<Candidate> = Vec::new();

            let first = Candidate {
                id: start,
                distance: self.dist_to(start, query),
            };
            scratch.visit(start);
            candidates.push(Reverse(first));
            if accept(start) {
                results.push(first);
            }

            while let Some(Reverse(cand)) = candidates.pop() {
                // Lower bound pruning: nothing left can improve a full result set
                if results.len() >= ef {
                    if let Some(worst) = results.peek() {
                        if cand.distance > worst.distance {
                            break;
                        }
                    }
                }

                let Some(node) = self.nodes.get(cand.id as usize) else {
                    continue;
                };
                if node.level() < layer {
                    continue;
                }

                let neighbors = node.layers[layer].read();
                for &n in neighbors.iter() {
                    if !scratch.visit(n) {
                        continue;
                    }
                    if !self.nodes.get(n as usize).is_some_and(|x| x.is_published()) {
                        continue;
                    }
                    let c = Candidate {
                        id: n,
                        distance: self.dist_to(n, query),
                    };
                    let promising = results.len() < ef
                        || results.peek().is_some_and(|worst| c.distance <= worst.distance);
                    if !promising {
                        continue;
                    }
                    candidates.push(Reverse(c));
                    if accept(n) {
                        results.push(c);
                        if results.len() > ef {
                            if let Some(evicted) = results.pop() {
                                boundary.push(evicted);
                            }
                            if let Some(worst) = results.peek() {
                                boundary.retain(|b| b.distance == worst.distance);
                            }
                        }
                    }
                }
            }

            let mut out = results.into_sorted_vec();
            out.extend(boundary);
            out
        })
    }
}
