//! Bloom filter index: single-field filters plus a multi-column index keyed by dotted path
//! (spec §4.H.3).

use std::collections::BTreeMap;

use byteorder::{LittleEndian, WriteBytesExt};
use serde_json::Value;

use crate::error::IndexesError;

/// Deterministically serializes `value` the way the spec requires so that equal logical values
/// always hash identically: strings and numbers (little-endian 8-byte IEEE-754) get their own
/// tags distinct from `null`/`undefined`-like absence, booleans and byte arrays are tagged, and
/// anything else falls back to its canonical JSON encoding.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        Value::Null => out.push(0u8),
        Value::Bool(b) => {
            out.push(1u8);
            out.push(*b as u8);
        }
        Value::Number(n) => {
            out.push(2u8);
            let f = n.as_f64().unwrap_or(0.0);
            out.write_f64::<LittleEndian>(f).expect("writing to a Vec cannot fail");
        }
        Value::String(s) => {
            out.push(3u8);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) if items.iter().all(|v| v.is_number()) && !items.is_empty() => {
            out.push(4u8);
            for item in items {
                if let Some(byte) = item.as_u64() {
                    out.push(byte as u8);
                }
            }
        }
        other => {
            out.push(5u8);
            out.extend_from_slice(other.to_string().as_bytes());
        }
    }
    out
}

fn fnv1a(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = 0xcbf29ce484222325u64 ^ seed;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// A classic Bloom filter with `num_bits` bits and `num_hashes` hash functions, derived from a
/// target `(expected_items, false_positive_rate)` by the standard formula (spec §4.H.3).
#[derive(Debug, Clone)]
pub struct BloomFilter {
    num_bits: u64,
    num_hashes: u32,
    bits: Vec<bool>,
}

impl BloomFilter {
    /// Builds a filter sized for `expected_items` entries at `false_positive_rate`.
    pub fn new(expected_items: u64, false_positive_rate: f64) -> Self {
        let n = (expected_items.max(1)) as f64;
        let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.999);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(8.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        Self {
            num_bits,
            num_hashes,
            bits: vec![false; num_bits as usize],
        }
    }

    fn positions(&self, value: &Value) -> impl Iterator<Item = u64> + '_ {
        let encoded = encode_value(value);
        let h1 = fnv1a(&encoded, 0);
        let h2 = fnv1a(&encoded, 0x9e3779b97f4a7c15);
        let num_bits = self.num_bits;
        (0..self.num_hashes).map(move |i| {
            let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
            combined % num_bits
        })
    }

    /// Records `value`'s presence.
    pub fn add(&mut self, value: &Value) {
        for pos in self.positions(value) {
            self.bits[pos as usize] = true;
        }
    }

    /// Tests whether `value` might be present. `false` is a definitive negative; `true` may be a
    /// false positive. A position computed outside the current bit vector's bounds (only
    /// possible after a corrupt load) is treated conservatively as set.
    pub fn might_contain(&self, value: &Value) -> bool {
        self.positions(value)
            .all(|pos| self.bits.get(pos as usize).copied().unwrap_or(true))
    }

    /// Bitwise-ORs `other` into `self`. Fails unless both filters share `{num_bits, num_hashes}`.
    pub fn merge(&mut self, other: &Self) -> Result<(), IndexesError> {
        if self.num_bits != other.num_bits || self.num_hashes != other.num_hashes {
            return Err(IndexesError::BloomShapeMismatch {
                lhs_bits: self.num_bits,
                lhs_hashes: self.num_hashes,
                rhs_bits: other.num_bits,
                rhs_hashes: other.num_hashes,
            });
        }
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a = *a || *b;
        }
        Ok(())
    }

    /// Estimates the number of distinct items added, from bit-population alone.
    pub fn estimate_count(&self) -> f64 {
        let m = self.num_bits as f64;
        let k = self.num_hashes as f64;
        let popcount = self.bits.iter().filter(|b| **b).count() as f64;
        if popcount >= m {
            return f64::INFINITY;
        }
        -(m / k) * (1.0 - popcount / m).ln()
    }

    /// The configured bit-vector size.
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// The configured number of hash functions.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }
}

/// Whether `field` reaches a conclusive verdict given a filter query operator, per spec §4.H.3's
/// matching rules. `None` means "consult the row itself" (range operators, `$ne`, unknown
/// fields all default to conservative inclusion).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomVerdict {
    /// The filter proves the document cannot match.
    DefiniteNo,
    /// Inconclusive — fall back to evaluating the predicate normally.
    MaybeYes,
}

/// A multi-field Bloom index keyed by dotted JSON path, one filter per field.
#[derive(Debug)]
pub struct BloomFilterIndex {
    filters: BTreeMap<String, BloomFilter>,
    expected_items: u64,
    false_positive_rate: f64,
}

impl BloomFilterIndex {
    /// Creates an index over `fields`, sizing each field's filter for `expected_items`.
    pub fn new(fields: &[String], expected_items: u64, false_positive_rate: f64) -> Self {
        let filters = fields
            .iter()
            .map(|f| (f.clone(), BloomFilter::new(expected_items, false_positive_rate)))
            .collect();
        Self { filters, expected_items, false_positive_rate }
    }

    /// Indexes every configured field's value from `payload`, skipping fields that are absent or
    /// explicitly `null`.
    pub fn add_row(&mut self, payload: &Value) {
        for (field, filter) in self.filters.iter_mut() {
            if let Some(value) = get_path(payload, field) {
                if !value.is_null() {
                    filter.add(value);
                }
            }
        }
    }

    /// Tests `$eq`/bare-value equality against `field`'s filter. `Some(DefiniteNo)` when the
    /// field is unindexed... actually an unindexed field is conservative yes per spec, so this
    /// returns `MaybeYes` in that case too.
    pub fn test_eq(&self, field: &str, value: &Value) -> BloomVerdict {
        match self.filters.get(field) {
            Some(filter) if !filter.might_contain(value) => BloomVerdict::DefiniteNo,
            _ => BloomVerdict::MaybeYes,
        }
    }

    /// Tests `$in` membership: a definite no only when every candidate is a definite no (or the
    /// list is empty).
    pub fn test_in(&self, field: &str, values: &[Value]) -> BloomVerdict {
        if values.is_empty() {
            return BloomVerdict::DefiniteNo;
        }
        let Some(filter) = self.filters.get(field) else {
            return BloomVerdict::MaybeYes;
        };
        if values.iter().any(|v| filter.might_contain(v)) {
            BloomVerdict::MaybeYes
        } else {
            BloomVerdict::DefiniteNo
        }
    }

    /// The configured expected-items/false-positive-rate this index's filters were sized with.
    pub fn sizing(&self) -> (u64, f64) {
        (self.expected_items, self.false_positive_rate)
    }
}

fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn membership_has_no_false_negatives() {
        let mut filter = BloomFilter::new(100, 0.01);
        for i in 0..50 {
            filter.add(&json!(format!("item-{i}")));
        }
        for i in 0..50 {
            assert!(filter.might_contain(&json!(format!("item-{i}"))));
        }
    }

    #[test]
    fn merge_requires_matching_shape() {
        let mut a = BloomFilter::new(100, 0.01);
        let b = BloomFilter::new(200, 0.01);
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn merge_unions_membership() {
        let mut a = BloomFilter::new(100, 0.01);
        let mut b = BloomFilter::new(100, 0.01);
        a.add(&json!("from-a"));
        b.add(&json!("from-b"));
        a.merge(&b).unwrap();
        assert!(a.might_contain(&json!("from-a")));
        assert!(a.might_contain(&json!("from-b")));
    }

    #[test]
    fn estimate_count_saturates_to_infinity() {
        let mut filter = BloomFilter::new(4, 0.5);
        for i in 0..1000 {
            filter.add(&json!(i));
        }
        assert_eq!(filter.estimate_count(), f64::INFINITY);
    }

    #[test]
    fn index_dispatches_by_dotted_path_and_skips_nulls() {
        let mut index = BloomFilterIndex::new(&["address.city".to_string()], 100, 0.01);
        index.add_row(&json!({"address": {"city": "Chicago"}}));
        index.add_row(&json!({"address": {"city": null}}));

        assert_eq!(
            index.test_eq("address.city", &json!("Chicago")),
            BloomVerdict::MaybeYes
        );
        assert_eq!(
            index.test_eq("address.city", &json!("Nowhere")),
            BloomVerdict::DefiniteNo
        );
    }

    #[test]
    fn unindexed_field_is_always_maybe_yes() {
        let index = BloomFilterIndex::new(&["known".to_string()], 100, 0.01);
        assert_eq!(index.test_eq("unknown", &json!(1)), BloomVerdict::MaybeYes);
    }

    #[test]
    fn empty_in_list_is_definite_no() {
        let index = BloomFilterIndex::new(&["field".to_string()], 100, 0.01);
        assert_eq!(index.test_in("field", &[]), BloomVerdict::DefiniteNo);
    }
}
