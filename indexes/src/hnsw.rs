//! HNSW (Hierarchical Navigable Small World) vector index (spec §4.H.1).

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::Rng;

use crate::error::IndexesError;

const MAGIC: u32 = 0x484E_5357; // "HNSW" as big-endian ASCII packed into a u32
const FORMAT_VERSION: u16 = 1;

/// Distance metric a vector index is built with. Smaller distance is better for `Cosine` and
/// `Euclidean`; larger raw value is better for `Dot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
    Euclidean,
    Dot,
}

impl Metric {
    fn tag(self) -> u8 {
        match self {
            Metric::Cosine => 0,
            Metric::Euclidean => 1,
            Metric::Dot => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Metric::Cosine),
            1 => Some(Metric::Euclidean),
            2 => Some(Metric::Dot),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dot => "dot",
        }
    }
}

/// Float width vectors are stored and persisted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Float32,
    Float64,
}

impl Precision {
    fn tag(self) -> u8 {
        match self {
            Precision::Float32 => 0,
            Precision::Float64 => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Precision::Float32),
            1 => Some(Precision::Float64),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Precision::Float32 => "float32",
            Precision::Float64 => "float64",
        }
    }
}

/// Vector index construction/search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct HnswConfig {
    pub dimensions: usize,
    pub metric: Metric,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub precision: Precision,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimensions: 0,
            metric: Metric::Cosine,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            precision: Precision::Float32,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    doc_id: String,
    row_group: u32,
    row_offset: u64,
    vector: Vec<f64>,
    layers: Vec<Vec<usize>>,
    deleted: bool,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn distance(metric: Metric, a: &[f64], b: &[f64]) -> f64 {
    match metric {
        Metric::Cosine => {
            let denom = norm(a) * norm(b);
            if denom == 0.0 {
                1.0
            } else {
                1.0 - (dot(a, b) / denom)
            }
        }
        Metric::Euclidean => a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt(),
        Metric::Dot => -dot(a, b),
    }
}

fn score_from_distance(metric: Metric, distance: f64) -> f64 {
    match metric {
        Metric::Cosine => 1.0 - distance,
        Metric::Euclidean => -distance,
        Metric::Dot => -distance,
    }
}

fn random_layer(m: usize) -> usize {
    let ml = 1.0 / (m.max(2) as f64).ln();
    let r: f64 = rand::thread_rng().gen_range(f64::MIN_POSITIVE..1.0);
    (-r.ln() * ml).floor() as usize
}

/// A single scored search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub doc_id: String,
    pub row_group: u32,
    pub row_offset: u64,
    pub score: f64,
}

/// The result of a [`HnswIndex::search`] call, carrying the telemetry the spec requires.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchResult {
    pub hits: Vec<VectorHit>,
    pub exact: bool,
    pub entries_scanned: usize,
}

/// An in-memory HNSW graph over fixed-dimension vectors.
#[derive(Debug)]
pub struct HnswIndex {
    config: HnswConfig,
    nodes: Vec<Node>,
    entry_point: Option<usize>,
    max_layer: usize,
}

impl HnswIndex {
    /// Creates an empty index with the given configuration.
    pub fn new(config: HnswConfig) -> Self {
        Self { config, nodes: Vec::new(), entry_point: None, max_layer: 0 }
    }

    /// Number of live (non-deleted) vectors.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| !n.deleted).count()
    }

    /// Whether the index has no live vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn search_layer(&self, query: &[f64], entry_points: &[usize], ef: usize, layer: usize) -> Vec<(usize, f64)> {
        let mut visited: std::collections::HashSet<usize> = std::collections::HashSet::new();
        let mut frontier: Vec<(usize, f64)> = Vec::new();
        let mut result: Vec<(usize, f64)> = Vec::new();

        for &ep in entry_points {
            if self.nodes[ep].deleted {
                continue;
            }
            if visited.insert(ep) {
                let d = distance(self.config.metric, query, &self.nodes[ep].vector);
                frontier.push((ep, d));
                result.push((ep, d));
            }
        }

        while let Some(&(current, current_dist)) = frontier
            .iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            frontier.retain(|&(id, _)| id != current);
            let worst = result
                .iter()
                .map(|r| r.1)
                .fold(f64::NEG_INFINITY, f64::max);
            if result.len() >= ef && current_dist > worst {
                break;
            }
            let Some(neighbors) = self.nodes[current].layers.get(layer).cloned() else {
                continue;
            };
            for neighbor in neighbors {
                if self.nodes[neighbor].deleted || !visited.insert(neighbor) {
                    continue;
                }
                let d = distance(self.config.metric, query, &self.nodes[neighbor].vector);
                let worst_now = result.iter().map(|r| r.1).fold(f64::NEG_INFINITY, f64::max);
                if result.len() < ef || d < worst_now {
                    frontier.push((neighbor, d));
                    result.push((neighbor, d));
                    if result.len() > ef {
                        if let Some((idx, _)) = result
                            .iter()
                            .enumerate()
                            .max_by(|a, b| a.1 .1.partial_cmp(&b.1 .1).unwrap_or(std::cmp::Ordering::Equal))
                        {
                            result.remove(idx);
                        }
                    }
                }
            }
        }

        result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        result
    }

    fn prune_neighbors(&mut self, node_id: usize, layer: usize, cap: usize) {
        if self.nodes[node_id].layers[layer].len() <= cap {
            return;
        }
        let own_vector = self.nodes[node_id].vector.clone();
        let metric = self.config.metric;
        let mut scored: Vec<(usize, f64)> = self.nodes[node_id].layers[layer]
            .iter()
            .map(|&n| (n, distance(metric, &own_vector, &self.nodes[n].vector)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(cap);
        self.nodes[node_id].layers[layer] = scored.into_iter().map(|(n, _)| n).collect();
    }

    fn connect(&mut self, a: usize, b: usize, layer: usize, cap: usize) {
        if layer < self.nodes[a].layers.len() && !self.nodes[a].layers[layer].contains(&b) {
            self.nodes[a].layers[layer].push(b);
            self.prune_neighbors(a, layer, cap);
        }
    }

    /// Inserts a vector under `doc_id`. Returns `false` without modifying the index when
    /// `vector.len() != dimensions` (silently skipped per spec).
    pub fn insert(&mut self, doc_id: String, row_group: u32, row_offset: u64, vector: Vec<f64>) -> bool {
        if vector.len() != self.config.dimensions {
            return false;
        }
        let level = random_layer(self.config.m);
        let new_id = self.nodes.len();
        self.nodes.push(Node {
            doc_id,
            row_group,
            row_offset,
            vector: vector.clone(),
            layers: vec![Vec::new(); level + 1],
            deleted: false,
        });

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(new_id);
            self.max_layer = level;
            return true;
        };

        let mut current = entry;
        for layer in (level + 1..=self.max_layer).rev() {
            if let Some(&(best, _)) = self.search_layer(&vector, &[current], 1, layer).first() {
                current = best;
            }
        }

        let mut entry_points = vec![current];
        for layer in (0..=level.min(self.max_layer)).rev() {
            let candidates = self.search_layer(&vector, &entry_points, self.config.ef_construction, layer);
            let cap = if layer == 0 { 2 * self.config.m } else { self.config.m };
            let selected: Vec<usize> = candidates.iter().take(cap).map(|&(id, _)| id).collect();
            self.nodes[new_id].layers[layer] = selected.clone();
            for neighbor in selected {
                self.connect(neighbor, new_id, layer, cap);
            }
            entry_points = candidates.into_iter().map(|(id, _)| id).collect();
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(new_id);
        }
        true
    }

    /// Marks `doc_id`'s vector deleted; it is bypassed in subsequent searches. Picks a new entry
    /// point if the deleted node held that role.
    pub fn delete(&mut self, doc_id: &str) -> bool {
        let Some(id) = self.nodes.iter().position(|n| n.doc_id == doc_id && !n.deleted) else {
            return false;
        };
        self.nodes[id].deleted = true;
        if self.entry_point == Some(id) {
            self.entry_point = self.nodes.iter().position(|n| !n.deleted);
            self.max_layer = self
                .nodes
                .iter()
                .filter(|n| !n.deleted)
                .map(|n| n.layers.len().saturating_sub(1))
                .max()
                .unwrap_or(0);
        }
        true
    }

    /// Replaces `doc_id`'s vector: a delete followed by an insert at the new value.
    pub fn update(&mut self, doc_id: String, row_group: u32, row_offset: u64, vector: Vec<f64>) -> bool {
        self.delete(&doc_id);
        self.insert(doc_id, row_group, row_offset, vector)
    }

    /// Finds the `k` nearest vectors to `query`, filtered by `min_score` if given.
    pub fn search(&self, query: &[f64], k: usize, ef_search: Option<usize>, min_score: Option<f64>) -> VectorSearchResult {
        if query.len() != self.config.dimensions {
            return VectorSearchResult { hits: Vec::new(), exact: false, entries_scanned: 0 };
        }
        let Some(entry) = self.entry_point else {
            return VectorSearchResult { hits: Vec::new(), exact: false, entries_scanned: 0 };
        };

        let mut current = entry;
        for layer in (1..=self.max_layer).rev() {
            if let Some(&(best, _)) = self.search_layer(query, &[current], 1, layer).first() {
                current = best;
            }
        }

        let ef = ef_search.unwrap_or(self.config.ef_search).max(k);
        let candidates = self.search_layer(query, &[current], ef, 0);
        let entries_scanned = candidates.len();

        let mut hits: Vec<VectorHit> = candidates
            .into_iter()
            .map(|(id, dist)| {
                let node = &self.nodes[id];
                VectorHit {
                    doc_id: node.doc_id.clone(),
                    row_group: node.row_group,
                    row_offset: node.row_offset,
                    score: score_from_distance(self.config.metric, dist),
                }
            })
            .filter(|hit| min_score.map_or(true, |m| hit.score >= m))
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);

        VectorSearchResult { hits, exact: false, entries_scanned }
    }

    /// Serializes the index: magic header, config, entry point, and every live-or-deleted node
    /// (deleted nodes are kept so neighbor indices stay stable across save/load).
    pub fn save(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(MAGIC).unwrap();
        out.write_u16::<LittleEndian>(FORMAT_VERSION).unwrap();
        out.write_u8(self.config.metric.tag()).unwrap();
        out.write_u32::<LittleEndian>(self.config.dimensions as u32).unwrap();
        out.write_u8(self.config.precision.tag()).unwrap();
        out.write_i64::<LittleEndian>(self.entry_point.map(|e| e as i64).unwrap_or(-1)).unwrap();
        out.write_u32::<LittleEndian>(self.nodes.len() as u32).unwrap();

        for node in &self.nodes {
            let doc_id_bytes = node.doc_id.as_bytes();
            out.write_u32::<LittleEndian>(doc_id_bytes.len() as u32).unwrap();
            out.extend_from_slice(doc_id_bytes);
            out.write_u32::<LittleEndian>(node.row_group).unwrap();
            out.write_u64::<LittleEndian>(node.row_offset).unwrap();
            out.write_u8(node.deleted as u8).unwrap();
            for &v in &node.vector {
                match self.config.precision {
                    Precision::Float32 => out.write_f32::<LittleEndian>(v as f32).unwrap(),
                    Precision::Float64 => out.write_f64::<LittleEndian>(v).unwrap(),
                }
            }
            out.write_u32::<LittleEndian>(node.layers.len() as u32).unwrap();
            for layer in &node.layers {
                out.write_u32::<LittleEndian>(layer.len() as u32).unwrap();
                for &neighbor in layer {
                    out.write_u32::<LittleEndian>(neighbor as u32).unwrap();
                }
            }
        }
        out
    }

    /// Deserializes an index previously written by [`HnswIndex::save`]. The persisted
    /// `{metric, dimensions, precision}` must match `config`'s, else `VectorIndexConfig`.
    pub fn load(config: HnswConfig, bytes: &[u8]) -> Result<Self, IndexesError> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor.read_u32::<LittleEndian>().map_err(|_| IndexesError::VectorIndexBadMagic)?;
        if magic != MAGIC {
            return Err(IndexesError::VectorIndexBadMagic);
        }
        let _version = cursor.read_u16::<LittleEndian>().map_err(corrupt)?;
        let metric_tag = cursor.read_u8().map_err(corrupt)?;
        let dimensions = cursor.read_u32::<LittleEndian>().map_err(corrupt)? as usize;
        let precision_tag = cursor.read_u8().map_err(corrupt)?;

        let metric = Metric::from_tag(metric_tag).ok_or_else(|| IndexesError::Corrupt {
            reason: format!("unknown metric tag {metric_tag}"),
        })?;
        let precision = Precision::from_tag(precision_tag).ok_or_else(|| IndexesError::Corrupt {
            reason: format!("unknown precision tag {precision_tag}"),
        })?;

        if metric != config.metric || dimensions != config.dimensions || precision != config.precision {
            return Err(IndexesError::VectorIndexConfig {
                configured: format!(
                    "metric={}, dimensions={}, precision={}",
                    config.metric.name(),
                    config.dimensions,
                    config.precision.name()
                ),
                persisted: format!(
                    "metric={}, dimensions={}, precision={}",
                    metric.name(),
                    dimensions,
                    precision.name()
                ),
            });
        }

        let entry_raw = cursor.read_i64::<LittleEndian>().map_err(corrupt)?;
        let entry_point = if entry_raw < 0 { None } else { Some(entry_raw as usize) };
        let node_count = cursor.read_u32::<LittleEndian>().map_err(corrupt)?;

        let mut nodes = Vec::with_capacity(node_count as usize);
        let mut max_layer = 0usize;
        for _ in 0..node_count {
            let doc_id_len = cursor.read_u32::<LittleEndian>().map_err(corrupt)? as usize;
            let mut doc_id_bytes = vec![0u8; doc_id_len];
            std::io::Read::read_exact(&mut cursor, &mut doc_id_bytes).map_err(corrupt)?;
            let doc_id = String::from_utf8(doc_id_bytes)
                .map_err(|_| IndexesError::Corrupt { reason: "doc_id is not valid utf8".into() })?;
            let row_group = cursor.read_u32::<LittleEndian>().map_err(corrupt)?;
            let row_offset = cursor.read_u64::<LittleEndian>().map_err(corrupt)?;
            let deleted = cursor.read_u8().map_err(corrupt)? != 0;

            let mut vector = Vec::with_capacity(dimensions);
            for _ in 0..dimensions {
                let v = match precision {
                    Precision::Float32 => cursor.read_f32::<LittleEndian>().map_err(corrupt)? as f64,
                    Precision::Float64 => cursor.read_f64::<LittleEndian>().map_err(corrupt)?,
                };
                vector.push(v);
            }

            let layer_count = cursor.read_u32::<LittleEndian>().map_err(corrupt)?;
            let mut layers = Vec::with_capacity(layer_count as usize);
            for _ in 0..layer_count {
                let neighbor_count = cursor.read_u32::<LittleEndian>().map_err(corrupt)?;
                let mut neighbors = Vec::with_capacity(neighbor_count as usize);
                for _ in 0..neighbor_count {
                    neighbors.push(cursor.read_u32::<LittleEndian>().map_err(corrupt)? as usize);
                }
                layers.push(neighbors);
            }
            if !deleted {
                max_layer = max_layer.max(layers.len().saturating_sub(1));
            }
            nodes.push(Node { doc_id, row_group, row_offset, vector, layers, deleted });
        }

        Ok(Self { config, nodes, entry_point, max_layer })
    }
}

fn corrupt(_: std::io::Error) -> IndexesError {
    IndexesError::Corrupt { reason: "truncated HNSW index data".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dimensions: usize) -> HnswConfig {
        HnswConfig { dimensions, m: 4, ef_construction: 32, ef_search: 16, ..HnswConfig::default() }
    }

    #[test]
    fn search_finds_nearest_vector() {
        let mut idx = HnswIndex::new(config(2));
        idx.insert("a".into(), 0, 0, vec![1.0, 0.0]);
        idx.insert("b".into(), 0, 1, vec![0.0, 1.0]);
        idx.insert("c".into(), 0, 2, vec![0.9, 0.1]);

        let result = idx.search(&[1.0, 0.0], 1, None, None);
        assert_eq!(result.hits[0].doc_id, "a");
        assert!(!result.exact);
    }

    #[test]
    fn mismatched_dimension_vectors_are_skipped_on_insert() {
        let mut idx = HnswIndex::new(config(3));
        assert!(!idx.insert("bad".into(), 0, 0, vec![1.0, 2.0]));
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn delete_excludes_from_future_searches() {
        let mut idx = HnswIndex::new(config(2));
        idx.insert("a".into(), 0, 0, vec![1.0, 0.0]);
        idx.insert("b".into(), 0, 1, vec![0.0, 1.0]);
        idx.delete("a");
        let result = idx.search(&[1.0, 0.0], 2, None, None);
        assert!(result.hits.iter().all(|h| h.doc_id != "a"));
    }

    #[test]
    fn update_moves_vector_to_new_position() {
        let mut idx = HnswIndex::new(config(2));
        idx.insert("a".into(), 0, 0, vec![1.0, 0.0]);
        idx.update("a".into(), 0, 0, vec![0.0, 1.0]);
        let result = idx.search(&[0.0, 1.0], 1, None, None);
        assert_eq!(result.hits[0].doc_id, "a");
    }

    #[test]
    fn save_load_roundtrip_preserves_search_behavior() {
        let mut idx = HnswIndex::new(config(2));
        idx.insert("a".into(), 0, 0, vec![1.0, 0.0]);
        idx.insert("b".into(), 0, 1, vec![0.0, 1.0]);
        let bytes = idx.save();
        let loaded = HnswIndex::load(config(2), &bytes).unwrap();
        let result = loaded.search(&[1.0, 0.0], 1, None, None);
        assert_eq!(result.hits[0].doc_id, "a");
    }

    #[test]
    fn load_rejects_mismatched_config() {
        let idx = HnswIndex::new(config(2));
        let bytes = idx.save();
        let err = HnswIndex::load(config(3), &bytes).unwrap_err();
        assert!(matches!(err, IndexesError::VectorIndexConfig { .. }));
    }

    #[test]
    fn load_rejects_bad_magic() {
        let err = HnswIndex::load(config(2), &[0u8; 4]).unwrap_err();
        assert!(matches!(err, IndexesError::VectorIndexBadMagic));
    }

    #[test]
    fn dot_metric_prefers_larger_raw_product() {
        let mut idx = HnswIndex::new(HnswConfig { metric: Metric::Dot, ..config(2) });
        idx.insert("small".into(), 0, 0, vec![1.0, 1.0]);
        idx.insert("large".into(), 0, 1, vec![10.0, 10.0]);
        let result = idx.search(&[1.0, 1.0], 1, None, None);
        assert_eq!(result.hits[0].doc_id, "large");
    }
}
