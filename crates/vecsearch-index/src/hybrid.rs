//! Fusion of a lexical and a vector ranked list.
//!
//! Two strategies:
//! - **min-max**: each list normalised into [0, 1], then weighted and summed
//! - **RRF**: reciprocal rank fusion, `sum(1 / (c + rank))`, rank 1-based
//!
//! Both produce score-descending output with ties broken by document id.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use vecsearch_core::types::sort_hits;
use vecsearch_core::{DocId, SearchHit, VecFloat};

pub const DEFAULT_RRF_C: VecFloat = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub lexical: VecFloat,
    pub vector: VecFloat,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            lexical: 0.5,
            vector: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Fusion {
    #[default]
    MinMax,
    Rrf { c: VecFloat },
}

impl Fusion {
    pub fn rrf() -> Self {
        Fusion::Rrf { c: DEFAULT_RRF_C }
    }

    pub fn fuse(
        self,
        lexical: &[SearchHit],
        vector: &[SearchHit],
        weights: HybridWeights,
        k: Option<usize>,
    ) -> Vec<SearchHit> {
        match self {
            Fusion::MinMax => merge(lexical, vector, weights, k),
            Fusion::Rrf { c } => rrf(lexical, vector, c, k),
        }
    }
}

/// Min-max weighted fusion.
///
/// A list whose scores are all equal normalises to 1.0; a document absent
/// from one list contributes 0 for it. Two empty lists give an empty result.
pub fn merge(
    lexical: &[SearchHit],
    vector: &[SearchHit],
    weights: HybridWeights,
    k: Option<usize>,
) -> Vec<SearchHit> {
    let mut scores: HashMap<&str, VecFloat> = HashMap::with_capacity(lexical.len() + vector.len());
    accumulate_min_max(&mut scores, lexical, weights.lexical);
    accumulate_min_max(&mut scores, vector, weights.vector);
    finish(scores, k)
}

/// Reciprocal rank fusion, unweighted.
pub fn rrf(lexical: &[SearchHit], vector: &[SearchHit], c: VecFloat, k: Option<usize>) -> Vec<SearchHit> {
    let mut scores: HashMap<&str, VecFloat> = HashMap::with_capacity(lexical.len() + vector.len());
    for list in [lexical, vector] {
        for (rank, hit) in dedup(list).into_iter().enumerate() {
            *scores.entry(hit.id.as_str()).or_insert(0.0) += 1.0 / (c + rank as VecFloat + 1.0);
        }
    }
    finish(scores, k)
}

fn accumulate_min_max<'a>(
    scores: &mut HashMap<&'a str, VecFloat>,
    list: &'a [SearchHit],
    weight: VecFloat,
) {
    let list = dedup(list);
    let Some((min, max)) = min_max(&list) else {
        return;
    };
    let range = max - min;
    for hit in list {
        let norm = if range <= VecFloat::EPSILON {
            1.0
        } else {
            (hit.score - min) / range
        };
        *scores.entry(hit.id.as_str()).or_insert(0.0) += weight * norm;
    }
}

// Keeps the first occurrence of each id.
fn dedup(list: &[SearchHit]) -> Vec<&SearchHit> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(list.len());
    list.iter().filter(|h| seen.insert(h.id.as_str())).collect()
}

fn min_max(list: &[&SearchHit]) -> Option<(VecFloat, VecFloat)> {
    if list.is_empty() {
        return None;
    }
    let mut min = VecFloat::INFINITY;
    let mut max = VecFloat::NEG_INFINITY;
    for h in list {
        min = min.min(h.score);
        max = max.max(h.score);
    }
    Some((min, max))
}

fn finish(scores: HashMap<&str, VecFloat>, k: Option<usize>) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = scores
        .into_iter()
        .map(|(id, score)| SearchHit::new(DocId::from(id), score))
        .collect();
    sort_hits(&mut hits);
    if let Some(k) = k {
        hits.truncate(k);
    }
    hits
}
