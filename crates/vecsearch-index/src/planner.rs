//! Query planner: one entry point for the four request kinds.
//!
//! * `Knn` goes straight to the graph.
//! * `FilteredKnn` evaluates the predicate to a bitmap, then either scans the
//!   allowed set exactly (selective filters) or over-fetches from the graph and
//!   drops non-matching hits, doubling `ef` until `k` survive.
//! * `Hybrid` runs a lexical and a vector search and fuses them.
//! * `Rerank` re-scores a first-pass candidate list by exact similarity.
//!
//! Every path reports whether it could fill `k`.

use crate::attributes::AttributeIndex;
use crate::hnsw::HnswIndex;
use crate::hybrid::{Fusion, HybridWeights};
use crate::lexical::KeywordIndex;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use vecsearch_core::types::sort_hits;
use vecsearch_core::{
    Completeness, FilterExpr, IndexError, NodeId, Result, SearchHit, VecFloat,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryRequest {
    Knn {
        vector: Vec<VecFloat>,
        k: usize,
        #[serde(default)]
        ef: Option<usize>,
    },
    FilteredKnn {
        vector: Vec<VecFloat>,
        k: usize,
        #[serde(default)]
        ef: Option<usize>,
        filter: FilterExpr,
    },
    Hybrid {
        vector: Vec<VecFloat>,
        k: usize,
        #[serde(default)]
        ef: Option<usize>,
        lexical: CandidateSource,
        #[serde(default)]
        weights: HybridWeights,
        #[serde(default)]
        fusion: Fusion,
    },
    Rerank {
        vector: Vec<VecFloat>,
        k: usize,
        candidates: CandidateSource,
        /// Size of the re-scored window; everything when absent. Hits past
        /// the window keep their first-pass scores and carry no distance, so
        /// in `Replace` mode their scores are not comparable with the window's.
        #[serde(default)]
        rerank_docs: Option<usize>,
        #[serde(default)]
        mode: RerankMode,
    },
}

/// Where a lexical or first-pass list comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CandidateSource {
    /// BM25 query against the collection's keyword index.
    Text {
        query: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Plain id list in rank order, every id scoring 1.0.
    Ids { ids: Vec<String> },
    /// Caller-scored list in rank order.
    Hits { hits: Vec<SearchHit> },
}

impl CandidateSource {
    pub fn text(query: impl Into<String>) -> Self {
        CandidateSource::Text {
            query: query.into(),
            limit: None,
        }
    }

    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CandidateSource::Ids {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RerankMode {
    /// Window ranked by exact vector score alone.
    #[default]
    Replace,
    /// Window ranked by `first_pass + weight * exact`.
    Add { weight: VecFloat },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum PlanKind {
    Knn,
    PreFilter,
    PostFilter { final_ef: usize },
    Hybrid,
    Rerank,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub hits: Vec<SearchHit>,
    pub completeness: Completeness,
    pub plan: PlanKind,
}

impl QueryResponse {
    fn new(hits: Vec<SearchHit>, k: usize, plan: PlanKind) -> Self {
        Self {
            completeness: Completeness::check(k, hits.len()),
            hits,
            plan,
        }
    }
}

/// Borrowed view over the structures a query may touch.
#[derive(Debug, Clone, Copy)]
pub struct QueryPlanner<'a> {
    index: &'a HnswIndex,
    attributes: &'a AttributeIndex,
    lexical: Option<&'a RwLock<KeywordIndex>>,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(index: &'a HnswIndex, attributes: &'a AttributeIndex) -> Self {
        Self {
            index,
            attributes,
            lexical: None,
        }
    }

    #[must_use]
    pub fn with_lexical(mut self, lexical: &'a RwLock<KeywordIndex>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    pub fn execute(&self, request: &QueryRequest) -> Result<QueryResponse> {
        match request {
            QueryRequest::Knn { vector, k, ef } => {
                let hits = self.index.search(vector, *k, self.ef(*ef))?;
                Ok(QueryResponse::new(hits, *k, PlanKind::Knn))
            }
            QueryRequest::FilteredKnn {
                vector,
                k,
                ef,
                filter,
            } => self.filtered_knn(vector, *k, self.ef(*ef), filter),
            QueryRequest::Hybrid {
                vector,
                k,
                ef,
                lexical,
                weights,
                fusion,
            } => self.hybrid(vector, *k, self.ef(*ef), lexical, *weights, *fusion),
            QueryRequest::Rerank {
                vector,
                k,
                candidates,
                rerank_docs,
                mode,
            } => self.rerank(vector, *k, candidates, *rerank_docs, *mode),
        }
    }

    fn ef(&self, ef: Option<usize>) -> usize {
        ef.unwrap_or_else(|| self.index.config.get_ef_search())
    }

    /// Bitmap of live nodes admitted by `filter`.
    pub fn allowed(&self, filter: &FilterExpr) -> RoaringBitmap {
        let universe = self.index.live_nodes();
        self.attributes
            .evaluate(filter, &universe, &|id: &str| self.index.node_of(id))
    }

    fn filtered_knn(
        &self,
        query: &[VecFloat],
        k: usize,
        ef: usize,
        filter: &FilterExpr,
    ) -> Result<QueryResponse> {
        self.index.validate_vector(query)?;
        let allowed = self.allowed(filter);
        let live = self.index.len();
        let threshold = self.index.config.get_prefilter_fraction() * live as f64;

        if (allowed.len() as f64) < threshold || allowed.is_empty() {
            tracing::debug!(allowed = allowed.len(), live, "pre-filter: exact scan");
            let hits = self.index.search_exact(query, k, Some(&allowed))?;
            return Ok(QueryResponse::new(hits, k, PlanKind::PreFilter));
        }

        self.index.config.inc_searches();
        let ceiling = self
            .index
            .config
            .get_max_ef()
            .min(self.index.node_count())
            .max(1);
        let mut ef = ef.max(k).min(ceiling);
        loop {
            let mut survivors = self.index.search_nodes(query, k, ef);
            survivors.retain(|c| allowed.contains(c.id));
            if survivors.len() >= k || ef >= ceiling {
                tracing::debug!(ef, found = survivors.len(), k, "post-filter done");
                let hits = self.index.to_hits(&survivors, k);
                return Ok(QueryResponse::new(hits, k, PlanKind::PostFilter { final_ef: ef }));
            }
            ef = (ef * 2).min(ceiling);
        }
    }

    fn hybrid(
        &self,
        query: &[VecFloat],
        k: usize,
        ef: usize,
        lexical: &CandidateSource,
        weights: HybridWeights,
        fusion: Fusion,
    ) -> Result<QueryResponse> {
        let depth = ef.max(k);
        let vector_hits = self.index.search(query, depth, depth)?;
        let lexical_hits = self.candidates(lexical, depth)?;
        let hits = fusion.fuse(&lexical_hits, &vector_hits, weights, Some(k));
        Ok(QueryResponse::new(hits, k, PlanKind::Hybrid))
    }

    fn rerank(
        &self,
        query: &[VecFloat],
        k: usize,
        candidates: &CandidateSource,
        rerank_docs: Option<usize>,
        mode: RerankMode,
    ) -> Result<QueryResponse> {
        self.index.validate_vector(query)?;
        self.index.config.inc_searches();

        let default_limit = rerank_docs.unwrap_or(k).max(k);
        let first_pass = self.candidates(candidates, default_limit)?;

        // Resolve to live nodes, first occurrence wins
        let mut seen: HashSet<NodeId> = HashSet::with_capacity(first_pass.len());
        let resolved: Vec<(NodeId, SearchHit)> = first_pass
            .into_iter()
            .filter_map(|hit| {
                let node = self.index.node_of(&hit.id)?;
                seen.insert(node).then_some((node, hit))
            })
            .collect();

        let window = rerank_docs.unwrap_or(resolved.len()).min(resolved.len());
        let metric = self.index.metric();
        let mut head: Vec<SearchHit> = Vec::with_capacity(window);
        for (node, hit) in &resolved[..window] {
            let Some(distance) = self.index.exact_distance(*node, query) else {
                continue;
            };
            let exact = metric.score(distance);
            let score = match mode {
                RerankMode::Replace => exact,
                RerankMode::Add { weight } => hit.score + weight * exact,
            };
            head.push(SearchHit {
                id: hit.id.clone(),
                score,
                distance: Some(distance),
            });
        }
        sort_hits(&mut head);

        let mut hits = head;
        hits.extend(resolved[window..].iter().map(|(_, hit)| hit.clone()));
        hits.truncate(k);
        Ok(QueryResponse::new(hits, k, PlanKind::Rerank))
    }

    /// Materialises a candidate source as ranked hits on live documents.
    fn candidates(&self, source: &CandidateSource, default_limit: usize) -> Result<Vec<SearchHit>> {
        match source {
            CandidateSource::Text { query, limit } => {
                let Some(lexical) = self.lexical else {
                    return Err(IndexError::InvalidParams(
                        "text candidates need a keyword index".into(),
                    ));
                };
                let found = lexical.read().search(query, limit.unwrap_or(default_limit));
                Ok(found
                    .into_iter()
                    .filter(|(node, _)| self.index.is_live(*node))
                    .filter_map(|(node, score)| {
                        self.index
                            .doc_id(node)
                            .map(|id| SearchHit::new(id, score))
                    })
                    .collect())
            }
            CandidateSource::Ids { ids } => Ok(ids
                .iter()
                .filter(|id| self.index.contains(id))
                .map(|id| SearchHit::new(id.clone(), 1.0))
                .collect()),
            CandidateSource::Hits { hits } => Ok(hits
                .iter()
                .filter(|h| self.index.contains(&h.id))
                .cloned()
                .collect()),
        }
    }
}
