//! 2-D geospatial index backed by a Hilbert space-filling curve (spec §4.H.4).
//!
//! Mapping lat/lon to a single `u128` code preserves locality well enough that a `BTreeMap`
//! keyed on the code gives reasonable range-query candidate sets without a dedicated R-tree.

use std::collections::BTreeMap;

/// Maximum curve order this module supports; `2 * order` bits must fit in a `u128`.
pub const MAX_ORDER: u32 = 32;

/// Encodes `(x, y)` grid coordinates (each in `[0, 2^order)`) into a single Hilbert curve
/// distance. Panics if `order` exceeds [`MAX_ORDER`] or a coordinate is out of range.
pub fn hilbert_encode(order: u32, mut x: u32, mut y: u32) -> u128 {
    assert!(order <= MAX_ORDER, "hilbert order {order} exceeds max {MAX_ORDER}");
    let side = if order == 32 { u32::MAX } else { (1u32 << order) - 1 };
    assert!(x <= side && y <= side, "coordinate out of range for order {order}");

    let mut rx;
    let mut ry;
    let mut d: u128 = 0;
    let mut s = 1u32 << (order - 1);
    while s > 0 {
        rx = if (x & s) > 0 { 1u32 } else { 0 };
        ry = if (y & s) > 0 { 1u32 } else { 0 };
        d += (s as u128) * (s as u128) * ((3 * rx) ^ ry) as u128;
        rotate(s, &mut x, &mut y, rx, ry);
        s >>= 1;
    }
    d
}

/// Inverse of [`hilbert_encode`]: recovers `(x, y)` grid coordinates from a Hilbert distance.
pub fn hilbert_decode(order: u32, distance: u128) -> (u32, u32) {
    assert!(order >= 1 && order <= MAX_ORDER, "hilbert order {order} exceeds max {MAX_ORDER}");
    let mut x = 0u32;
    let mut y = 0u32;
    let mut t = distance;
    let limit = 1u64 << order;
    let mut s = 1u32;
    while (s as u64) < limit {
        let rx = (1 & (t >> 1)) as u32;
        let ry = (1 & (t ^ rx as u128)) as u32;
        rotate(s, &mut x, &mut y, rx, ry);
        x += s * rx;
        y += s * ry;
        t /= 4;
        s <<= 1;
    }
    (x, y)
}

fn rotate(s: u32, x: &mut u32, y: &mut u32, rx: u32, ry: u32) {
    if ry == 0 {
        if rx == 1 {
            *x = s.wrapping_sub(1).wrapping_sub(*x);
            *y = s.wrapping_sub(1).wrapping_sub(*y);
        }
        std::mem::swap(x, y);
    }
}

/// Normalizes a `(latitude, longitude)` pair in degrees into `(x, y)` grid coordinates for the
/// given curve `order`.
pub fn lat_lon_to_grid(order: u32, latitude: f64, longitude: f64) -> (u32, u32) {
    let side = (1u64 << order) as f64;
    let lat = latitude.clamp(-90.0, 90.0);
    let lon = longitude.clamp(-180.0, 180.0);
    let ny = ((lat + 90.0) / 180.0 * (side - 1.0)).round() as u32;
    let nx = ((lon + 180.0) / 360.0 * (side - 1.0)).round() as u32;
    (nx, ny)
}

/// Encodes a `(latitude, longitude)` point directly into a Hilbert code at `order`.
pub fn encode_point(order: u32, latitude: f64, longitude: f64) -> u128 {
    let (x, y) = lat_lon_to_grid(order, latitude, longitude);
    hilbert_encode(order, x, y)
}

/// Hex, zero-padded serialization of a Hilbert code, sized to `2*order` bits so codes sort
/// lexically the same way they sort numerically.
pub fn encode_hex(order: u32, code: u128) -> String {
    let width = ((2 * order as usize) + 3) / 4;
    format!("{code:0width$x}", width = width)
}

/// An ordered index over Hilbert-encoded points: documents with nearby codes are likely to be
/// spatially close, so a range scan over the code space is a reasonable candidate filter.
#[derive(Debug)]
pub struct GeoIndex {
    order: u32,
    entries: BTreeMap<u128, Vec<String>>,
}

impl GeoIndex {
    /// Creates an empty index at the given curve `order` (bits per axis, up to [`MAX_ORDER`]).
    pub fn new(order: u32) -> Self {
        assert!(order >= 1 && order <= MAX_ORDER);
        Self { order, entries: BTreeMap::new() }
    }

    /// The curve order this index was built with.
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Indexes `doc_id` at `(latitude, longitude)`.
    pub fn insert(&mut self, doc_id: String, latitude: f64, longitude: f64) {
        let code = encode_point(self.order, latitude, longitude);
        let docs = self.entries.entry(code).or_default();
        if !docs.contains(&doc_id) {
            docs.push(doc_id);
        }
    }

    /// Removes `doc_id` previously indexed at `(latitude, longitude)`.
    pub fn remove(&mut self, doc_id: &str, latitude: f64, longitude: f64) {
        let code = encode_point(self.order, latitude, longitude);
        if let Some(docs) = self.entries.get_mut(&code) {
            docs.retain(|d| d != doc_id);
            if docs.is_empty() {
                self.entries.remove(&code);
            }
        }
    }

    /// Returns candidate doc ids whose Hilbert code falls within `[lower, upper]`. Bounding-box
    /// queries should widen this range generously and post-filter by true distance, since the
    /// curve does not preserve locality perfectly at box edges.
    pub fn range(&self, lower: u128, upper: u128) -> Vec<String> {
        let mut out = Vec::new();
        for (_, docs) in self.entries.range(lower..=upper) {
            out.extend(docs.iter().cloned());
        }
        out.sort();
        out.dedup();
        out
    }

    /// Candidates within a padded window around `(latitude, longitude)`, expressed as a grid-cell
    /// radius `pad` added to the point's own cell coordinates on each axis before re-encoding the
    /// corners. `pad = 0` returns only exact-cell matches.
    pub fn nearby(&self, latitude: f64, longitude: f64, pad: u32) -> Vec<String> {
        let (x, y) = lat_lon_to_grid(self.order, latitude, longitude);
        let side = (1u64 << self.order) as u32 - 1;
        let lo = hilbert_encode(self.order, x.saturating_sub(pad), y.saturating_sub(pad));
        let hi = hilbert_encode(self.order, (x + pad).min(side), (y + pad).min(side));
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        self.range(lo, hi)
    }

    /// Sorts `doc_ids` (paired with their points) by Hilbert code, improving locality for scans
    /// that consume them in order.
    pub fn sort_by_hilbert(&self, points: &[(String, f64, f64)]) -> Vec<String> {
        let mut coded: Vec<(u128, &str)> = points
            .iter()
            .map(|(id, lat, lon)| (encode_point(self.order, *lat, *lon), id.as_str()))
            .collect();
        coded.sort_by_key(|(code, _)| *code);
        coded.into_iter().map(|(_, id)| id.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        for order in [4, 8, 16] {
            let side = (1u32 << order) - 1;
            for &(x, y) in &[(0, 0), (side, side), (3, 5), (side, 0)] {
                let d = hilbert_encode(order, x, y);
                let (dx, dy) = hilbert_decode(order, d);
                assert_eq!((x, y), (dx, dy), "order={order}");
            }
        }
    }

    #[test]
    fn adjacent_cells_have_nearby_codes_on_average() {
        let d1 = hilbert_encode(8, 10, 10);
        let d2 = hilbert_encode(8, 11, 10);
        let max_code = hilbert_encode(8, 255, 255);
        assert!(d1.abs_diff(d2) < max_code / 4);
    }

    #[test]
    fn hex_encoding_is_zero_padded_to_order_width() {
        let code = hilbert_encode(8, 1, 1);
        let hex = encode_hex(8, code);
        assert_eq!(hex.len(), 4);
    }

    #[test]
    fn index_insert_and_range_roundtrip() {
        let mut idx = GeoIndex::new(16);
        idx.insert("chicago".into(), 41.8781, -87.6298);
        idx.insert("new_york".into(), 40.7128, -74.0060);
        let all = idx.range(0, u128::MAX);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn remove_drops_point() {
        let mut idx = GeoIndex::new(16);
        idx.insert("a".into(), 10.0, 10.0);
        idx.remove("a", 10.0, 10.0);
        assert!(idx.range(0, u128::MAX).is_empty());
    }

    #[test]
    fn sort_by_hilbert_is_deterministic_and_complete() {
        let idx = GeoIndex::new(8);
        let points = vec![
            ("a".to_string(), 10.0, 10.0),
            ("b".to_string(), -10.0, -10.0),
            ("c".to_string(), 0.0, 0.0),
        ];
        let sorted = idx.sort_by_hilbert(&points);
        assert_eq!(sorted.len(), 3);
        assert!(sorted.contains(&"a".to_string()));
    }
}
