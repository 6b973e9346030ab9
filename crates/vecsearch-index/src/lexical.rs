//! BM25 keyword index over document text.
//!
//! The default lexical candidate source for hybrid and re-rank queries.
//! Text is lowercased, split on a word regex, stripped of English stop words
//! and stemmed, so "banks" and "bank" share a posting list.

use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::LazyLock;
use vecsearch_core::NodeId;

pub const BM25_K1: f64 = 1.2;
pub const BM25_B: f64 = 0.75;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("word pattern is a valid regex"));

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
        "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
        "these", "they", "this", "to", "was", "will", "with",
    ]
    .into_iter()
    .collect()
});

/// Lowercases, splits, drops stop words and one-letter tokens, stems.
pub fn tokenize(stemmer: &Stemmer, text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(t))
        .map(|t| stemmer.stem(t).into_owned())
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    node: NodeId,
    tf: u32,
}

pub struct KeywordIndex {
    stemmer: Stemmer,
    postings: HashMap<String, Vec<Posting>>,
    // node -> token count, 0 for nodes without indexed text
    doc_lengths: Vec<u32>,
    doc_count: u32,
    total_len: u64,
}

impl std::fmt::Debug for KeywordIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordIndex")
            .field("terms", &self.postings.len())
            .field("doc_count", &self.doc_count)
            .finish_non_exhaustive()
    }
}

impl Default for KeywordIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
            postings: HashMap::new(),
            doc_lengths: Vec::new(),
            doc_count: 0,
            total_len: 0,
        }
    }

    pub fn doc_count(&self) -> usize {
        self.doc_count as usize
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn add(&mut self, node: NodeId, text: &str) {
        self.remove(node);
        let tokens = tokenize(&self.stemmer, text);
        if tokens.is_empty() {
            return;
        }

        let idx = node as usize;
        if idx >= self.doc_lengths.len() {
            self.doc_lengths.resize(idx + 1, 0);
        }
        let len = tokens.len() as u32;
        self.doc_lengths[idx] = len;
        self.doc_count += 1;
        self.total_len += u64::from(len);

        let mut tf: HashMap<String, u32> = HashMap::new();
        for t in tokens {
            *tf.entry(t).or_insert(0) += 1;
        }
        for (term, count) in tf {
            self.postings
                .entry(term)
                .or_default()
                .push(Posting { node, tf: count });
        }
    }

    pub fn remove(&mut self, node: NodeId) {
        let idx = node as usize;
        let Some(&len) = self.doc_lengths.get(idx) else {
            return;
        };
        if len == 0 {
            return;
        }
        self.doc_lengths[idx] = 0;
        self.doc_count -= 1;
        self.total_len -= u64::from(len);
        self.postings.retain(|_, list| {
            list.retain(|p| p.node != node);
            !list.is_empty()
        });
    }

    fn average_len(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.total_len as f64 / f64::from(self.doc_count)
        }
    }

    /// Okapi BM25 top-`k`, score descending, ties by node id ascending.
    pub fn search(&self, query: &str, k: usize) -> Vec<(NodeId, f64)> {
        let terms = tokenize(&self.stemmer, query);
        if terms.is_empty() || self.doc_count == 0 || k == 0 {
            return Vec::new();
        }

        let n = f64::from(self.doc_count);
        let avgdl = self.average_len();
        let mut scores: HashMap<NodeId, f64> = HashMap::new();

        // Repeated query terms count once
        let unique: HashSet<&String> = terms.iter().collect();
        for term in unique {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let df = list.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for p in list {
                let dl = f64::from(self.doc_lengths.get(p.node as usize).copied().unwrap_or(0));
                let tf = f64::from(p.tf);
                let norm = tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avgdl));
                *scores.entry(p.node).or_insert(0.0) += idf * norm;
            }
        }

        let mut heap: BinaryHeap<Reverse<Scored>> = BinaryHeap::with_capacity(k.min(scores.len()) + 1);
        for (node, score) in scores {
            heap.push(Reverse(Scored { score, node }));
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut out: Vec<Scored> = heap.into_iter().map(|Reverse(s)| s).collect();
        out.sort_unstable_by(|a, b| b.cmp(a));
        out.into_iter().map(|s| (s.node, s.score)).collect()
    }
}

// Higher score is greater; on equal score the lower node id is greater.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Scored {
    score: f64,
    node: NodeId,
}

impl Eq for Scored {}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
