//! In-memory ordered index over a single field, used as a candidate-set source for range
//! predicates instead of a linear scan (spec §4.H.5).

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

/// A totally-ordered index key. Numbers are stored as `f64` bit patterns via [`OrderedFloat`]
/// so the map's `Ord` impl stays total even for non-finite values encountered in practice.
#[derive(Debug, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Serialize, Deserialize)]
pub enum IndexKey {
    /// A null/missing field value, sorted before everything else.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A numeric value.
    Number(OrderedFloat),
    /// A string value.
    Str(String),
}

/// A wrapper giving `f64` a total order (`NaN` sorts after every other number, consistent with
/// itself so `BTreeMap` invariants hold).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl IndexKey {
    /// Builds an [`IndexKey`] from a JSON value, for indexing a document field.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(OrderedFloat(n.as_f64().unwrap_or(f64::NAN))),
            serde_json::Value::String(s) => Self::Str(s.clone()),
            other => Self::Str(other.to_string()),
        }
    }
}

/// An ordered index mapping field values to the document ids that carry them.
#[derive(Debug, Default)]
pub struct BTreeIndex {
    entries: BTreeMap<IndexKey, Vec<String>>,
}

impl BTreeIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `doc_id` under `key`.
    pub fn insert(&mut self, key: IndexKey, doc_id: String) {
        let docs = self.entries.entry(key).or_default();
        if !docs.contains(&doc_id) {
            docs.push(doc_id);
        }
    }

    /// Removes `doc_id` from `key`'s posting list, dropping the key entirely once empty.
    pub fn remove(&mut self, key: &IndexKey, doc_id: &str) {
        if let Some(docs) = self.entries.get_mut(key) {
            docs.retain(|d| d != doc_id);
            if docs.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    /// Exact-match lookup (`$eq`, bare value).
    pub fn eq(&self, key: &IndexKey) -> Vec<String> {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Membership lookup across several keys (`$in`).
    pub fn in_set(&self, keys: &[IndexKey]) -> Vec<String> {
        let mut out = Vec::new();
        for key in keys {
            out.extend(self.eq(key));
        }
        out.sort();
        out.dedup();
        out
    }

    /// Range scan. `None` bounds are unbounded on that side.
    pub fn range(&self, lower: Bound<IndexKey>, upper: Bound<IndexKey>) -> Vec<String> {
        let mut out = Vec::new();
        for (_, docs) in self.entries.range((lower, upper)) {
            out.extend(docs.iter().cloned());
        }
        out.sort();
        out.dedup();
        out
    }

    /// Number of distinct keys currently indexed.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_and_in_set_lookups() {
        let mut idx = BTreeIndex::new();
        idx.insert(IndexKey::Number(OrderedFloat(1.0)), "a".into());
        idx.insert(IndexKey::Number(OrderedFloat(2.0)), "b".into());
        idx.insert(IndexKey::Number(OrderedFloat(2.0)), "c".into());

        assert_eq!(idx.eq(&IndexKey::Number(OrderedFloat(2.0))), vec!["b", "c"]);
        let mut in_result = idx.in_set(&[IndexKey::Number(OrderedFloat(1.0)), IndexKey::Number(OrderedFloat(2.0))]);
        in_result.sort();
        assert_eq!(in_result, vec!["a", "b", "c"]);
    }

    #[test]
    fn range_scan_respects_bounds() {
        let mut idx = BTreeIndex::new();
        for i in 0..5 {
            idx.insert(IndexKey::Number(OrderedFloat(i as f64)), format!("doc{i}"));
        }
        let result = idx.range(
            Bound::Included(IndexKey::Number(OrderedFloat(1.0))),
            Bound::Excluded(IndexKey::Number(OrderedFloat(4.0))),
        );
        assert_eq!(result, vec!["doc1", "doc2", "doc3"]);
    }

    #[test]
    fn remove_drops_empty_keys() {
        let mut idx = BTreeIndex::new();
        idx.insert(IndexKey::Str("a".into()), "doc1".into());
        idx.remove(&IndexKey::Str("a".into()), "doc1");
        assert_eq!(idx.key_count(), 0);
    }

    #[test]
    fn null_sorts_before_every_other_key() {
        let mut idx = BTreeIndex::new();
        idx.insert(IndexKey::Null, "n".into());
        idx.insert(IndexKey::Bool(false), "f".into());
        idx.insert(IndexKey::Number(OrderedFloat(-1e9)), "neg".into());
        let keys: Vec<_> = idx.entries.keys().collect();
        assert_eq!(keys[0], &IndexKey::Null);
    }
}
