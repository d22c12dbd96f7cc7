//! Dotted-path navigation and the shredding path rewrite (spec §4.F "Variant shredding
//! integration", §4.G).

use serde_json::Value;

use crate::config::ShreddingConfig;

/// Navigates `value` by a dotted path, stopping (returning `None`) as soon as an intermediate
/// segment is not an object — primitives never continue navigation past themselves.
pub fn navigate<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Rewrites a dotted logical field path into its shredded physical path: every segment gets a
/// trailing `.typed_value`, so `column.field` becomes `column.typed_value.field.typed_value`.
pub fn shredded_path(field_path: &str) -> String {
    field_path
        .split('.')
        .map(|segment| format!("{segment}.typed_value"))
        .collect::<Vec<_>>()
        .join(".")
}

/// Rewrites `field_path` to its physical shredded path when `config` marks it hot; otherwise
/// returns it unchanged, for the planner to read straight off the raw JSON column.
pub fn rewrite_filter_path(config: &ShreddingConfig, field_path: &str) -> String {
    if config.is_shredded(field_path) {
        shredded_path(field_path)
    } else {
        field_path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn navigate_follows_nested_objects() {
        let doc = json!({"address": {"city": "Chicago"}});
        assert_eq!(navigate(&doc, "address.city"), Some(&json!("Chicago")));
    }

    #[test]
    fn navigate_stops_at_primitives() {
        let doc = json!({"age": 30});
        assert_eq!(navigate(&doc, "age.whatever"), None);
    }

    #[test]
    fn navigate_returns_none_for_missing_segment() {
        let doc = json!({"a": {"b": 1}});
        assert_eq!(navigate(&doc, "a.c"), None);
    }

    #[test]
    fn shredded_path_wraps_every_segment() {
        assert_eq!(shredded_path("column.field"), "column.typed_value.field.typed_value");
        assert_eq!(shredded_path("price"), "price.typed_value");
    }

    #[test]
    fn rewrite_only_applies_to_configured_fields() {
        let mut config = ShreddingConfig::new(10);
        config.mark_shredded("price");
        assert_eq!(rewrite_filter_path(&config, "price"), "price.typed_value");
        assert_eq!(rewrite_filter_path(&config, "name"), "name");
    }
}
