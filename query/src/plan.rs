//! File-level pruning: deciding which data files a filter could possibly match before reading
//! any bytes (spec §4.F "Planning").
//!
//! This repo's Parquet files are small, single-batch files (not internally row-group-partitioned
//! for pruning purposes, see [`parquet_file::FileStatistics`]), so "row group" in the spec's
//! planning steps corresponds one-to-one with "file" here.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use indexes::{BloomFilterIndex, BloomVerdict};
use parquet_file::{ColumnStats, FileStatistics};
use schema::AddAction;
use serde_json::Value;

use crate::eval::compare_values;
use crate::filter::{FieldPredicate, Filter};

fn survives_column_stats(pred: &FieldPredicate, stats: &ColumnStats) -> bool {
    let in_range = |x: &Value| -> bool {
        let above_min = stats.min.as_ref().map_or(true, |min| compare_values(x, min) != Some(Ordering::Less));
        let below_max = stats.max.as_ref().map_or(true, |max| compare_values(x, max) != Some(Ordering::Greater));
        above_min && below_max
    };
    match pred {
        FieldPredicate::Eq(x) if x.is_null() => stats.null_count > 0,
        FieldPredicate::Eq(x) => in_range(x),
        FieldPredicate::Gt(x) => stats.max.as_ref().map_or(true, |max| compare_values(max, x) == Some(Ordering::Greater)),
        FieldPredicate::Gte(x) => {
            stats.max.as_ref().map_or(true, |max| matches!(compare_values(max, x), Some(Ordering::Greater | Ordering::Equal)))
        }
        FieldPredicate::Lt(x) => stats.min.as_ref().map_or(true, |min| compare_values(min, x) == Some(Ordering::Less)),
        FieldPredicate::Lte(x) => {
            stats.min.as_ref().map_or(true, |min| matches!(compare_values(min, x), Some(Ordering::Less | Ordering::Equal)))
        }
        FieldPredicate::In(xs) => xs.iter().any(in_range),
        FieldPredicate::Ne(x) => !(stats.min.as_ref() == Some(x) && stats.max.as_ref() == Some(x)),
        // Conservative: never prunes.
        FieldPredicate::StartsWith(_)
        | FieldPredicate::EndsWith(_)
        | FieldPredicate::Contains(_)
        | FieldPredicate::Nin(_)
        | FieldPredicate::Exists(_)
        | FieldPredicate::Type(_)
        | FieldPredicate::Regex { .. }
        | FieldPredicate::All(_)
        | FieldPredicate::Size(_)
        | FieldPredicate::ElemMatch(_)
        | FieldPredicate::Unknown(_) => true,
    }
}

fn survives_stats(filter: &Filter, stats: &FileStatistics) -> bool {
    match filter {
        Filter::MatchAll => true,
        Filter::And(subs) => subs.iter().all(|f| survives_stats(f, stats)),
        Filter::Or(subs) => subs.iter().any(|f| survives_stats(f, stats)),
        // Neither $nor nor $not has a sound per-column stats pruning rule in the spec; include
        // conservatively and let row-level evaluation decide.
        Filter::Nor(_) | Filter::Not(_) => true,
        Filter::Vector(_) => true,
        Filter::Field(name, preds) => match stats.0.get(name) {
            Some(col) => preds.iter().all(|p| survives_column_stats(p, col)),
            None => true,
        },
    }
}

fn survives_bloom(filter: &Filter, bloom: &BloomFilterIndex) -> bool {
    match filter {
        Filter::MatchAll => true,
        Filter::And(subs) => subs.iter().all(|f| survives_bloom(f, bloom)),
        Filter::Or(subs) => subs.iter().any(|f| survives_bloom(f, bloom)),
        Filter::Nor(_) | Filter::Not(_) => true,
        Filter::Vector(_) => true,
        Filter::Field(name, preds) => preds.iter().all(|p| match p {
            FieldPredicate::Eq(x) => bloom.test_eq(name, x) != BloomVerdict::DefiniteNo,
            FieldPredicate::In(xs) => bloom.test_in(name, xs) != BloomVerdict::DefiniteNo,
            _ => true,
        }),
    }
}

/// Which files in `files` survive stats-based pruning for `filter` (spec §4.F steps 2-3).
/// Files with no parsable stats are always kept — "missing stats ⇒ include".
pub fn prune_by_stats<'a>(filter: &Filter, files: &'a BTreeMap<String, AddAction>) -> Vec<&'a str> {
    files
        .iter()
        .filter(|(_, add)| match add.stats.as_deref().and_then(FileStatistics::from_json) {
            Some(stats) => survives_stats(filter, &stats),
            None => true,
        })
        .map(|(path, _)| path.as_str())
        .collect()
}

/// Further narrows `candidates` using a bloom filter index over equality/membership clauses
/// (spec §4.F step 4). Callers typically chain this after [`prune_by_stats`], though bloom
/// filters in this repo are namespace-wide rather than per-file, so in practice a "no" here
/// prunes every candidate at once rather than one file at a time.
pub fn prune_by_bloom(filter: &Filter, bloom: &BloomFilterIndex) -> bool {
    survives_bloom(filter, bloom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_with_stats(path: &str, stats: FileStatistics) -> AddAction {
        AddAction {
            path: path.to_string(),
            size: 0,
            modification_time: 0,
            data_change: true,
            partition_values: Default::default(),
            stats: Some(stats.to_json()),
            tags: None,
        }
    }

    #[test]
    fn gt_prunes_files_whose_max_does_not_exceed_bound() {
        let mut low = FileStatistics::default();
        low.observe("age", Some(&json!(10)));
        low.observe("age", Some(&json!(20)));
        let mut high = FileStatistics::default();
        high.observe("age", Some(&json!(50)));
        high.observe("age", Some(&json!(90)));

        let mut files = BTreeMap::new();
        files.insert("low.parquet".to_string(), add_with_stats("low.parquet", low));
        files.insert("high.parquet".to_string(), add_with_stats("high.parquet", high));

        let filter = Filter::parse(&json!({"age": {"$gt": 30}})).unwrap();
        let survivors = prune_by_stats(&filter, &files);
        assert_eq!(survivors, vec!["high.parquet"]);
    }

    #[test]
    fn missing_stats_column_cannot_be_pruned() {
        let stats = FileStatistics::default();
        let mut files = BTreeMap::new();
        files.insert("f.parquet".to_string(), add_with_stats("f.parquet", stats));
        let filter = Filter::parse(&json!({"untracked": {"$gt": 30}})).unwrap();
        assert_eq!(prune_by_stats(&filter, &files), vec!["f.parquet"]);
    }

    #[test]
    fn file_with_no_stats_string_is_always_kept() {
        let mut files = BTreeMap::new();
        files.insert(
            "nostats.parquet".to_string(),
            AddAction {
                path: "nostats.parquet".into(),
                size: 0,
                modification_time: 0,
                data_change: true,
                partition_values: Default::default(),
                stats: None,
                tags: None,
            },
        );
        let filter = Filter::parse(&json!({"age": {"$gt": 30}})).unwrap();
        assert_eq!(prune_by_stats(&filter, &files), vec!["nostats.parquet"]);
    }

    #[test]
    fn null_equality_prunes_when_no_nulls_observed() {
        let mut stats = FileStatistics::default();
        stats.observe("deletedAt", Some(&json!("2026-01-01T00:00:00Z")));
        let mut files = BTreeMap::new();
        files.insert("f.parquet".to_string(), add_with_stats("f.parquet", stats));
        let filter = Filter::parse(&json!({"deletedAt": null})).unwrap();
        assert!(prune_by_stats(&filter, &files).is_empty());
    }

    #[test]
    fn and_intersects_or_unions_survivors() {
        let mut a = FileStatistics::default();
        a.observe("age", Some(&json!(10)));
        a.observe("status", Some(&json!("active")));
        let mut files = BTreeMap::new();
        files.insert("f.parquet".to_string(), add_with_stats("f.parquet", a));

        let and_filter = Filter::parse(&json!({"$and": [{"age": {"$gt": 100}}, {"status": "active"}]})).unwrap();
        assert!(prune_by_stats(&and_filter, &files).is_empty());

        let or_filter = Filter::parse(&json!({"$or": [{"age": {"$gt": 100}}, {"status": "active"}]})).unwrap();
        assert_eq!(prune_by_stats(&or_filter, &files), vec!["f.parquet"]);
    }

    #[test]
    fn bloom_definite_no_prunes_equality_clause() {
        let mut bloom = BloomFilterIndex::new(&["slug".to_string()], 100, 0.01);
        bloom.add_row(&json!({"slug": "hello-world"}));
        let present = Filter::parse(&json!({"slug": "hello-world"})).unwrap();
        assert!(prune_by_bloom(&present, &bloom));
        let absent = Filter::parse(&json!({"slug": "nope"})).unwrap();
        assert!(!prune_by_bloom(&absent, &bloom));
    }
}
