//! Row-level predicate evaluation: compiling a [`Filter`] into a closure over a JSON row (spec
//! §4.F "Predicate compilation").

use std::cmp::Ordering;

use chrono::DateTime;
use regex::RegexBuilder;
use serde_json::Value;
use variant::navigate;

use crate::filter::{FieldPredicate, Filter, VectorClause};

/// Compares two JSON scalars. Numbers compare numerically; strings that both parse as RFC3339
/// timestamps compare by instant (spec: "dates compare by timestamp"), otherwise lexically;
/// booleans compare `false < true`. Mixed or incomparable types return `None`.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => {
            match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn regex_matches(pattern: &str, options: &str, haystack: &str) -> bool {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .build()
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

fn array_contains(haystack: &[Value], needle: &Value) -> bool {
    haystack.iter().any(|v| v == needle)
}

fn predicate_matches(pred: &FieldPredicate, field: Option<&Value>) -> bool {
    let null = Value::Null;
    let field_val = field.unwrap_or(&null);
    match pred {
        FieldPredicate::Eq(x) => field_val == x,
        FieldPredicate::Ne(x) => field_val != x,
        FieldPredicate::Gt(x) => compare_values(field_val, x) == Some(Ordering::Greater),
        FieldPredicate::Gte(x) => matches!(compare_values(field_val, x), Some(Ordering::Greater | Ordering::Equal)),
        FieldPredicate::Lt(x) => compare_values(field_val, x) == Some(Ordering::Less),
        FieldPredicate::Lte(x) => matches!(compare_values(field_val, x), Some(Ordering::Less | Ordering::Equal)),
        FieldPredicate::In(xs) => xs.iter().any(|x| field_val == x),
        FieldPredicate::Nin(xs) => !xs.iter().any(|x| field_val == x),
        FieldPredicate::Exists(want) => field.is_some() == *want,
        FieldPredicate::Type(type_name) => field.is_some_and(|v| value_type_name(v) == type_name),
        FieldPredicate::Regex { pattern, options } => {
            field_val.as_str().is_some_and(|s| regex_matches(pattern, options, s))
        }
        FieldPredicate::StartsWith(prefix) => field_val.as_str().is_some_and(|s| s.starts_with(prefix.as_str())),
        FieldPredicate::EndsWith(suffix) => field_val.as_str().is_some_and(|s| s.ends_with(suffix.as_str())),
        FieldPredicate::Contains(needle) => field_val.as_str().is_some_and(|s| s.contains(needle.as_str())),
        FieldPredicate::All(xs) => {
            field_val.as_array().is_some_and(|arr| xs.iter().all(|x| array_contains(arr, x)))
        }
        FieldPredicate::Size(n) => field_val.as_array().is_some_and(|arr| arr.len() as u64 == *n),
        FieldPredicate::ElemMatch(sub) => {
            field_val.as_array().is_some_and(|arr| arr.iter().any(|elem| sub.matches(elem)))
        }
        // Unknown operators are silently ignored by row matching (spec §4.F); only the API
        // boundary's `Filter::validate` rejects them.
        FieldPredicate::Unknown(_) => true,
    }
}

impl Filter {
    /// Whether `row` satisfies this filter.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::MatchAll => true,
            Filter::And(subs) => subs.iter().all(|f| f.matches(row)),
            Filter::Or(subs) => subs.iter().any(|f| f.matches(row)),
            Filter::Nor(subs) => !subs.iter().any(|f| f.matches(row)),
            Filter::Not(sub) => !sub.matches(row),
            Filter::Vector(VectorClause { .. }) => true,
            Filter::Field(name, preds) => {
                let field = navigate(row, name);
                preds.iter().all(|p| predicate_matches(p, field))
            }
        }
    }

    /// Compiles this filter into a reusable closure over a row, so callers scanning many rows
    /// don't re-walk the AST's enum match on every call site (spec §4.F "predicate compilation").
    pub fn compile(self) -> impl Fn(&Value) -> bool {
        move |row: &Value| self.matches(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn f(doc: Value) -> Filter {
        Filter::parse(&doc).unwrap()
    }

    #[test]
    fn null_row_field_never_equals_non_null_filter_value() {
        let filter = f(json!({"name": "alice"}));
        assert!(!filter.matches(&json!({"name": null})));
        assert!(!filter.matches(&json!({})));
    }

    #[test]
    fn match_all_matches_rows_with_null_fields() {
        let filter = f(json!({}));
        assert!(filter.matches(&json!({"anything": null})));
    }

    #[test]
    fn range_operators_compare_numerically() {
        let filter = f(json!({"age": {"$gte": 18, "$lt": 65}}));
        assert!(filter.matches(&json!({"age": 30})));
        assert!(!filter.matches(&json!({"age": 17})));
        assert!(!filter.matches(&json!({"age": 65})));
    }

    #[test]
    fn array_equality_is_deep_element_wise() {
        let filter = f(json!({"tags": ["a", "b"]}));
        assert!(filter.matches(&json!({"tags": ["a", "b"]})));
        assert!(!filter.matches(&json!({"tags": ["b", "a"]})));
    }

    #[test]
    fn object_eq_is_deep() {
        let filter = f(json!({"addr": {"city": "Chicago", "zip": "60601"}}));
        assert!(filter.matches(&json!({"addr": {"city": "Chicago", "zip": "60601"}})));
        assert!(!filter.matches(&json!({"addr": {"city": "Chicago"}})));
    }

    #[test]
    fn regex_honors_case_insensitive_option() {
        let filter = f(json!({"title": {"$regex": "^foo", "$options": "i"}}));
        assert!(filter.matches(&json!({"title": "FOOBAR"})));
        assert!(!f(json!({"title": {"$regex": "^foo"}})).matches(&json!({"title": "FOOBAR"})));
    }

    #[test]
    fn dates_compare_by_parsed_timestamp_not_lexical_order() {
        let filter = f(json!({"createdAt": {"$gt": "2026-01-01T00:00:00Z"}}));
        assert!(filter.matches(&json!({"createdAt": "2026-06-01T00:00:00Z"})));
        assert!(!filter.matches(&json!({"createdAt": "2025-01-01T00:00:00Z"})));
    }

    #[test]
    fn dotted_path_traverses_objects_only() {
        let filter = f(json!({"address.city": "Chicago"}));
        assert!(filter.matches(&json!({"address": {"city": "Chicago"}})));
        assert!(!filter.matches(&json!({"address": "not an object"})));
    }

    #[test]
    fn elem_match_requires_one_satisfying_element() {
        let filter = f(json!({"items": {"$elemMatch": {"price": {"$gt": 10}}}}));
        assert!(filter.matches(&json!({"items": [{"price": 5}, {"price": 20}]})));
        assert!(!filter.matches(&json!({"items": [{"price": 5}, {"price": 8}]})));
    }

    #[test]
    fn unknown_operator_is_ignored_by_matching() {
        let filter = f(json!({"age": {"$bogus": 1}}));
        assert!(filter.matches(&json!({"age": 30})));
    }

    #[test]
    fn nor_matches_when_no_child_matches() {
        let filter = f(json!({"$nor": [{"a": 1}, {"b": 2}]}));
        assert!(filter.matches(&json!({"a": 9, "b": 9})));
        assert!(!filter.matches(&json!({"a": 1, "b": 9})));
    }

    #[test]
    fn compiled_closure_matches_same_as_direct_call() {
        let filter = f(json!({"age": {"$gte": 18}}));
        let compiled = filter.clone().compile();
        assert_eq!(compiled(&json!({"age": 30})), filter.matches(&json!({"age": 30})));
    }
}
