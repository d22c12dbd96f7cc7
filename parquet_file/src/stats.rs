//! File-level column statistics, embedded as JSON in an `AddAction.stats` string (spec §4.C
//! "Action schemas", matching the Delta/Iceberg convention of file-granularity, not row-group,
//! min/max/null-count statistics).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Min/max/null-count summary for one column across an entire data file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    /// The smallest non-null value seen, if any row had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    /// The largest non-null value seen, if any row had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    /// Number of rows with a null value in this column.
    pub null_count: u64,
}

impl ColumnStats {
    fn observe(&mut self, value: Option<&Value>) {
        match value {
            None | Some(Value::Null) => self.null_count += 1,
            Some(v) => {
                if self.min.as_ref().map_or(true, |min| compare(v, min) == Ordering::Less) {
                    self.min = Some(v.clone());
                }
                if self.max.as_ref().map_or(true, |max| compare(v, max) == Ordering::Greater) {
                    self.max = Some(v.clone());
                }
            }
        }
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .map(|(a, b)| a.total_cmp(&b))
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Per-column statistics for every tracked column in a data file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStatistics(pub BTreeMap<String, ColumnStats>);

impl FileStatistics {
    /// Observes one row's value for `column`, updating its running min/max/null-count.
    pub fn observe(&mut self, column: &str, value: Option<&Value>) {
        self.0.entry(column.to_string()).or_default().observe(value);
    }

    /// Serializes to the JSON string an [`schema::action::AddAction::stats`] field carries.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses an `AddAction.stats` JSON string back into structured statistics.
    pub fn from_json(s: &str) -> Option<Self> {
        serde_json::from_str(s).ok()
    }

    /// Whether a file with these statistics could contain a row where `column` falls in
    /// `[lo, hi]` (inclusive). Returns `true` (cannot prune) when the column wasn't tracked, or
    /// either bound is a type stats can't compare (spec §4.F "range pruning is best-effort").
    pub fn may_overlap(&self, column: &str, lo: &Value, hi: &Value) -> bool {
        let Some(stats) = self.0.get(column) else {
            return true;
        };
        let (Some(min), Some(max)) = (&stats.min, &stats.max) else {
            return true;
        };
        compare(min, hi) != Ordering::Greater && compare(max, lo) != Ordering::Less
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tracks_min_max_and_nulls() {
        let mut stats = FileStatistics::default();
        stats.observe("version", Some(&json!(3)));
        stats.observe("version", Some(&json!(1)));
        stats.observe("version", Some(&json!(7)));
        stats.observe("version", None);
        let col = &stats.0["version"];
        assert_eq!(col.min, Some(json!(1)));
        assert_eq!(col.max, Some(json!(7)));
        assert_eq!(col.null_count, 1);
    }

    #[test]
    fn json_round_trips() {
        let mut stats = FileStatistics::default();
        stats.observe("name", Some(&json!("alice")));
        let json = stats.to_json();
        let back = FileStatistics::from_json(&json).unwrap();
        assert_eq!(stats, back);
    }

    #[test]
    fn may_overlap_prunes_disjoint_ranges() {
        let mut stats = FileStatistics::default();
        stats.observe("version", Some(&json!(10)));
        stats.observe("version", Some(&json!(20)));
        assert!(stats.may_overlap("version", &json!(15), &json!(25)));
        assert!(!stats.may_overlap("version", &json!(21), &json!(30)));
    }

    #[test]
    fn may_overlap_untracked_column_cannot_prune() {
        let stats = FileStatistics::default();
        assert!(stats.may_overlap("unknown", &json!(1), &json!(2)));
    }
}
