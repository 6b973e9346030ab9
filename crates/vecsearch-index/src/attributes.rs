//! Attribute index backing filtered search.
//!
//! Every attribute is indexed as an exact `key:value` tag in a roaring bitmap.
//! Values that parse as `i64` are additionally kept in a per-key B-tree so
//! ranges resolve to a union of bitmaps.

use dashmap::DashMap;
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, HashMap};
use vecsearch_core::{FilterExpr, NodeId};

#[derive(Debug, Default)]
pub struct AttributeIndex {
    inverted: DashMap<String, RoaringBitmap>,
    numeric: DashMap<String, BTreeMap<i64, RoaringBitmap>>,
    forward: DashMap<NodeId, HashMap<String, String>>,
}

fn tag(key: &str, value: &str) -> String {
    format!("{key}:{value}")
}

impl AttributeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node: NodeId, attributes: &HashMap<String, String>) {
        if attributes.is_empty() {
            return;
        }
        for (key, val) in attributes {
            self.inverted.entry(tag(key, val)).or_default().insert(node);
            if let Ok(num) = val.trim().parse::<i64>() {
                self.numeric
                    .entry(key.clone())
                    .or_default()
                    .entry(num)
                    .or_default()
                    .insert(node);
            }
        }
        self.forward.insert(node, attributes.clone());
    }

    /// Drops `node` from every posting list.
    pub fn remove(&self, node: NodeId) {
        let Some((_, attributes)) = self.forward.remove(&node) else {
            return;
        };
        for (key, val) in &attributes {
            let t = tag(key, val);
            let empty = self.inverted.get_mut(&t).is_some_and(|mut bm| {
                bm.remove(node);
                bm.is_empty()
            });
            if empty {
                self.inverted.remove(&t);
            }
            if let Ok(num) = val.trim().parse::<i64>() {
                if let Some(mut tree) = self.numeric.get_mut(key) {
                    if let Some(bm) = tree.get_mut(&num) {
                        bm.remove(node);
                        if bm.is_empty() {
                            tree.remove(&num);
                        }
                    }
                }
            }
        }
    }

    pub fn get(&self, node: NodeId) -> Option<HashMap<String, String>> {
        self.forward.get(&node).map(|a| a.clone())
    }

    /// Number of distinct `key:value` tags.
    pub fn tag_count(&self) -> usize {
        self.inverted.len()
    }

    /// Resolves `expr` to the subset of `universe` it admits.
    ///
    /// `resolve` maps document ids to live nodes for `IdIn`; unknown ids are
    /// ignored. `Not` is taken relative to `universe`.
    pub fn evaluate<F>(&self, expr: &FilterExpr, universe: &RoaringBitmap, resolve: &F) -> RoaringBitmap
    where
        F: Fn(&str) -> Option<NodeId>,
    {
        match expr {
            FilterExpr::Match { key, value } => self
                .inverted
                .get(&tag(key, value))
                .map(|bm| &*bm & universe)
                .unwrap_or_default(),
            FilterExpr::Range { key, gte, lte } => {
                let start = gte.unwrap_or(i64::MIN);
                let end = lte.unwrap_or(i64::MAX);
                if start > end {
                    return RoaringBitmap::new();
                }
                let mut union = RoaringBitmap::new();
                if let Some(tree) = self.numeric.get(key) {
                    for (_, bm) in tree.range(start..=end) {
                        union |= bm;
                    }
                }
                union & universe
            }
            FilterExpr::IdIn { ids } => {
                let found: RoaringBitmap = ids.iter().filter_map(|id| resolve(id)).collect();
                found & universe
            }
            FilterExpr::And { all } => {
                let mut acc = universe.clone();
                for e in all {
                    if acc.is_empty() {
                        break;
                    }
                    acc &= self.evaluate(e, universe, resolve);
                }
                acc
            }
            FilterExpr::Or { any } => {
                let mut acc = RoaringBitmap::new();
                for e in any {
                    acc |= self.evaluate(e, universe, resolve);
                }
                acc
            }
            FilterExpr::Not { expr } => universe - self.evaluate(expr, universe, resolve),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn fixture() -> (AttributeIndex, RoaringBitmap) {
        let idx = AttributeIndex::new();
        idx.insert(0, &attrs(&[("lang", "en"), ("year", "2019")]));
        idx.insert(1, &attrs(&[("lang", "de"), ("year", "2021")]));
        idx.insert(2, &attrs(&[("lang", "en"), ("year", "2023")]));
        idx.insert(3, &attrs(&[("lang", "fr")]));
        (idx, (0..4).collect())
    }

    fn no_ids(_: &str) -> Option<NodeId> {
        None
    }

    #[test]
    fn test_match_and_range() {
        let (idx, all) = fixture();
        let en = idx.evaluate(&FilterExpr::matches("lang", "en"), &all, &no_ids);
        assert_eq!(en.iter().collect::<Vec<_>>(), vec![0, 2]);

        let recent = idx.evaluate(&FilterExpr::range("year", Some(2020), None), &all, &no_ids);
        assert_eq!(recent.iter().collect::<Vec<_>>(), vec![1, 2]);

        let both = FilterExpr::matches("lang", "en").and(FilterExpr::range("year", Some(2020), None));
        assert_eq!(idx.evaluate(&both, &all, &no_ids).iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_not_is_relative_to_universe() {
        let (idx, _) = fixture();
        let universe: RoaringBitmap = [0u32, 1, 3].into_iter().collect();
        let not_en = idx.evaluate(&FilterExpr::matches("lang", "en").negate(), &universe, &no_ids);
        assert_eq!(not_en.iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_id_in_uses_resolver() {
        let (idx, all) = fixture();
        let resolve = |id: &str| id.strip_prefix("doc").and_then(|n| n.parse().ok());
        let ids = FilterExpr::ids(["doc1", "doc3", "doc9", "nope"]);
        assert_eq!(idx.evaluate(&ids, &all, &resolve).iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_remove_clears_postings() {
        let (idx, all) = fixture();
        idx.remove(0);
        let en = idx.evaluate(&FilterExpr::matches("lang", "en"), &all, &no_ids);
        assert_eq!(en.iter().collect::<Vec<_>>(), vec![2]);
        assert!(idx.get(0).is_none());
        let old = idx.evaluate(&FilterExpr::range("year", None, Some(2019)), &all, &no_ids);
        assert!(old.is_empty());
    }

    #[test]
    fn test_unknown_key_matches_nothing() {
        let (idx, all) = fixture();
        assert!(idx.evaluate(&FilterExpr::matches("color", "red"), &all, &no_ids).is_empty());
        let or = FilterExpr::Or {
            any: vec![FilterExpr::matches("color", "red"), FilterExpr::matches("lang", "fr")],
        };
        assert_eq!(idx.evaluate(&or, &all, &no_ids).iter().collect::<Vec<_>>(), vec![3]);
    }
}
