//! The typed projection a shredded field gets alongside its raw JSON value (spec §4.G).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scalar value promoted out of a JSON payload into its own typed column. Objects, arrays, and
/// `null` have no typed projection — they stay JSON-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TypedScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl TypedScalar {
    /// Attempts to shred `value` into a typed scalar; `None` for object/array/null.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Null | Value::Object(_) | Value::Array(_) => None,
        }
    }

    /// Converts back to its JSON representation.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Self::Str(s) => Value::String(s.clone()),
        }
    }
}

/// A shredded field: the original JSON value plus its typed projection, if one exists. This is
/// the physical layout a `typed_value` path component in a rewritten filter addresses — field
/// names here are snake_case on purpose, matching the path segment `shredded_path` appends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShreddedValue {
    pub raw_value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typed_value: Option<TypedScalar>,
}

impl ShreddedValue {
    /// Shreds `value`, deriving its typed projection when possible.
    pub fn shred(value: &Value) -> Self {
        Self { raw_value: value.clone(), typed_value: TypedScalar::from_json(value) }
    }

    /// The flattened row shape a rewritten filter path actually navigates: `{raw_value:
    /// ..., typed_value: <bare scalar, or absent>}`, as opposed to this struct's own tagged
    /// `Serialize` impl (which round-trips `TypedScalar`'s variant for persistence, not for
    /// query-time comparison against bare filter literals).
    pub fn to_row_value(&self) -> Value {
        let mut row = serde_json::Map::new();
        row.insert("raw_value".to_string(), self.raw_value.clone());
        if let Some(typed) = &self.typed_value {
            row.insert("typed_value".to_string(), typed.to_json());
        }
        Value::Object(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_shred_to_typed_value() {
        assert_eq!(TypedScalar::from_json(&json!(42)), Some(TypedScalar::Int(42)));
        assert_eq!(TypedScalar::from_json(&json!(1.5)), Some(TypedScalar::Float(1.5)));
        assert_eq!(TypedScalar::from_json(&json!("x")), Some(TypedScalar::Str("x".into())));
        assert_eq!(TypedScalar::from_json(&json!(true)), Some(TypedScalar::Bool(true)));
    }

    #[test]
    fn objects_arrays_and_null_have_no_typed_projection() {
        assert_eq!(TypedScalar::from_json(&json!(null)), None);
        assert_eq!(TypedScalar::from_json(&json!({"a": 1})), None);
        assert_eq!(TypedScalar::from_json(&json!([1, 2])), None);
    }

    #[test]
    fn shredded_value_keeps_raw_json_alongside_typed_projection() {
        let shredded = ShreddedValue::shred(&json!(7));
        assert_eq!(shredded.raw_value, json!(7));
        assert_eq!(shredded.typed_value, Some(TypedScalar::Int(7)));
    }

    #[test]
    fn row_value_flattens_typed_projection_to_a_bare_scalar() {
        let shredded = ShreddedValue::shred(&json!(7));
        assert_eq!(shredded.to_row_value(), json!({"raw_value": 7, "typed_value": 7}));

        let untyped = ShreddedValue::shred(&json!({"nested": true}));
        assert_eq!(untyped.to_row_value(), json!({"raw_value": {"nested": true}}));
    }
}
