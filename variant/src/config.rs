//! Per-collection shredding configuration and auto-detect sampling (spec §4.G).

use std::collections::{BTreeMap, BTreeSet};

use observability_deps::tracing::debug;
use parking_lot::Mutex;
use serde_json::Value;

/// Which dotted payload fields a collection shreds into a typed projection, plus the sample
/// threshold auto-detection promotes new fields at.
#[derive(Debug, Clone)]
pub struct ShreddingConfig {
    shredded_fields: BTreeSet<String>,
    auto_detect_threshold: u64,
}

impl ShreddingConfig {
    /// Creates a config with no fields explicitly shredded yet.
    pub fn new(auto_detect_threshold: u64) -> Self {
        Self { shredded_fields: BTreeSet::new(), auto_detect_threshold }
    }

    /// The configured auto-detect promotion threshold.
    pub fn auto_detect_threshold(&self) -> u64 {
        self.auto_detect_threshold
    }

    /// Explicitly marks `field_path` as hot, bypassing auto-detection.
    pub fn mark_shredded(&mut self, field_path: impl Into<String>) {
        self.shredded_fields.insert(field_path.into());
    }

    /// Whether `field_path` currently has a typed projection.
    pub fn is_shredded(&self, field_path: &str) -> bool {
        self.shredded_fields.contains(field_path)
    }

    /// Every currently-shredded field path.
    pub fn shredded_fields(&self) -> Vec<String> {
        self.shredded_fields.iter().cloned().collect()
    }
}

fn leaf_paths(value: &Value, prefix: &str, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
                leaf_paths(v, &path, out);
            }
        }
        _ if !prefix.is_empty() => out.push(prefix.to_string()),
        _ => {}
    }
}

/// Samples payload rows and promotes a field to shredded once it has appeared in more than
/// `auto_detect_threshold` observed rows (spec §4.G: `VariantShredder::observe`).
#[derive(Debug)]
pub struct VariantShredder {
    threshold: u64,
    counts: Mutex<BTreeMap<String, u64>>,
    promoted: Mutex<BTreeSet<String>>,
}

impl VariantShredder {
    /// Creates a shredder that promotes a field after more than `auto_detect_threshold`
    /// occurrences.
    pub fn new(auto_detect_threshold: u64) -> Self {
        Self { threshold: auto_detect_threshold, counts: Mutex::new(BTreeMap::new()), promoted: Mutex::new(BTreeSet::new()) }
    }

    /// Builds a shredder from an existing [`ShreddingConfig`]'s threshold, seeding its already-hot
    /// fields as pre-promoted.
    pub fn from_config(config: &ShreddingConfig) -> Self {
        let shredder = Self::new(config.auto_detect_threshold());
        *shredder.promoted.lock() = config.shredded_fields.clone();
        shredder
    }

    /// Records one payload's leaf field occurrences, returning the field paths newly promoted by
    /// this observation (empty if none crossed the threshold this call).
    pub fn observe(&self, payload: &Value) -> Vec<String> {
        let mut paths = Vec::new();
        leaf_paths(payload, "", &mut paths);

        let mut counts = self.counts.lock();
        let mut promoted = self.promoted.lock();
        let mut newly_promoted = Vec::new();
        for path in paths {
            let count = counts.entry(path.clone()).or_insert(0);
            *count += 1;
            if *count > self.threshold && promoted.insert(path.clone()) {
                debug!(field = %path, count = *count, "promoting field to shredded");
                newly_promoted.push(path);
            }
        }
        newly_promoted
    }

    /// How many sampled rows have carried `field_path` so far.
    pub fn count_of(&self, field_path: &str) -> u64 {
        *self.counts.lock().get(field_path).unwrap_or(&0)
    }

    /// Every field promoted (explicitly configured or auto-detected) so far.
    pub fn promoted_fields(&self) -> Vec<String> {
        self.promoted.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_promotes_once_count_exceeds_threshold() {
        let shredder = VariantShredder::new(2);
        assert!(shredder.observe(&json!({"price": 10})).is_empty());
        assert!(shredder.observe(&json!({"price": 20})).is_empty());
        assert_eq!(shredder.observe(&json!({"price": 30})), vec!["price".to_string()]);
        assert_eq!(shredder.promoted_fields(), vec!["price".to_string()]);
    }

    #[test]
    fn nested_fields_are_tracked_by_dotted_path() {
        let shredder = VariantShredder::new(0);
        let promoted = shredder.observe(&json!({"address": {"city": "Chicago"}}));
        assert_eq!(promoted, vec!["address.city".to_string()]);
    }

    #[test]
    fn a_field_is_only_promoted_once() {
        let shredder = VariantShredder::new(0);
        shredder.observe(&json!({"price": 1}));
        assert!(shredder.observe(&json!({"price": 2})).is_empty());
    }

    #[test]
    fn explicit_config_fields_seed_as_pre_promoted() {
        let mut config = ShreddingConfig::new(5);
        config.mark_shredded("price");
        let shredder = VariantShredder::from_config(&config);
        assert_eq!(shredder.promoted_fields(), vec!["price".to_string()]);
    }
}
