use crate::VecFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Internal node identifier (index into the node arena and the vector store).
pub type NodeId = u32;

/// External, caller-chosen document identifier.
pub type DocId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub text: String,
    pub vector: Vec<VecFloat>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Document {
    pub fn new(id: impl Into<DocId>, vector: Vec<VecFloat>) -> Self {
        Self {
            id: id.into(),
            text: String::new(),
            vector,
            attributes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// One ranked result. `score` is higher-is-better; `distance` is the raw
/// metric distance when the hit came from the vector side, `None` for purely
/// lexical or fused hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: DocId,
    pub score: VecFloat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<VecFloat>,
}

impl SearchHit {
    pub fn new(id: impl Into<DocId>, score: VecFloat) -> Self {
        Self {
            id: id.into(),
            score,
            distance: None,
        }
    }

    /// Result order: score descending, then document id ascending.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Sorts hits into result order in place.
pub fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(SearchHit::rank_cmp);
}

/// Whether a query path could satisfy the requested `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completeness {
    #[default]
    Complete,
    /// Best-effort list shorter than requested. Never padded.
    InsufficientCandidates { requested: usize, found: usize },
}

impl Completeness {
    pub fn check(requested: usize, found: usize) -> Self {
        if found < requested {
            Completeness::InsufficientCandidates { requested, found }
        } else {
            Completeness::Complete
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }
}
