//! MongoDB-dialect filter AST and its parser (spec §4.F).

use dberror::{DbError, ErrorCode};
use serde_json::{Map, Value};

/// A single operator applied to one field, e.g. the `{$gt: 5}` in `{age: {$gt: 5}}`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldPredicate {
    /// Bare-value equality, or `$eq`.
    Eq(Value),
    /// `$ne`.
    Ne(Value),
    /// `$gt`.
    Gt(Value),
    /// `$gte`.
    Gte(Value),
    /// `$lt`.
    Lt(Value),
    /// `$lte`.
    Lte(Value),
    /// `$in`.
    In(Vec<Value>),
    /// `$nin`.
    Nin(Vec<Value>),
    /// `$exists`.
    Exists(bool),
    /// `$type`, naming one of `"null","bool","number","string","object","array"`.
    Type(String),
    /// `$regex` paired with its sibling `$options` (may be empty).
    Regex {
        /// The pattern source.
        pattern: String,
        /// Flag letters, e.g. `"i"`.
        options: String,
    },
    /// `$startsWith`.
    StartsWith(String),
    /// `$endsWith`.
    EndsWith(String),
    /// `$contains`.
    Contains(String),
    /// `$all`: the field array must contain every listed value.
    All(Vec<Value>),
    /// `$size`: the field array's length must equal this.
    Size(u64),
    /// `$elemMatch`: at least one array element must satisfy the nested filter.
    ElemMatch(Box<Filter>),
    /// An operator this build doesn't recognize. Silently ignored by row matching, but
    /// [`Filter::validate`] reports it as [`ErrorCode::InvalidFilter`] at the API boundary.
    Unknown(String),
}

/// A vector-similarity clause: `{$vector: {field, near, k, minScore?}}` (spec §4.F, §4.H.1).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorClause {
    /// Which vector index to query.
    pub field: String,
    /// The query vector.
    pub near: Vec<f64>,
    /// How many neighbors to return.
    pub k: usize,
    /// Discard hits below this score, if set.
    pub min_score: Option<f64>,
}

/// A parsed filter document.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `{}` — matches every row, including ones where referenced fields are `null`.
    MatchAll,
    /// `{$and: [...]}`.
    And(Vec<Filter>),
    /// `{$or: [...]}`.
    Or(Vec<Filter>),
    /// `{$nor: [...]}`.
    Nor(Vec<Filter>),
    /// `{$not: {...}}`.
    Not(Box<Filter>),
    /// One field with one or more operators applied (implicitly AND-ed together).
    Field(String, Vec<FieldPredicate>),
    /// `{$vector: {...}}`.
    Vector(VectorClause),
}

fn invalid_filter(reason: impl Into<String>) -> DbError {
    DbError::new(ErrorCode::InvalidFilter, "invalid filter document").with_context("reason", reason)
}

fn as_array(value: &Value, op: &str) -> Result<Vec<Value>, DbError> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| invalid_filter(format!("{op} requires an array value")))
}

fn parse_logical_array(op: &str, value: &Value) -> Result<Vec<Filter>, DbError> {
    as_array(value, op)?.iter().map(Filter::parse).collect()
}

fn parse_vector_clause(value: &Value) -> Result<VectorClause, DbError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid_filter("$vector requires an object value"))?;
    let field = obj
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_filter("$vector.field is required"))?
        .to_string();
    let near = obj
        .get("near")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid_filter("$vector.near must be an array of numbers"))?
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| invalid_filter("$vector.near elements must be numbers")))
        .collect::<Result<Vec<_>, _>>()?;
    let k = obj
        .get("k")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid_filter("$vector.k is required"))? as usize;
    let min_score = obj.get("minScore").and_then(Value::as_f64);
    Ok(VectorClause { field, near, k, min_score })
}

fn parse_field_predicate(op: &str, value: &Value) -> Result<FieldPredicate, DbError> {
    Ok(match op {
        "$eq" => FieldPredicate::Eq(value.clone()),
        "$ne" => FieldPredicate::Ne(value.clone()),
        "$gt" => FieldPredicate::Gt(value.clone()),
        "$gte" => FieldPredicate::Gte(value.clone()),
        "$lt" => FieldPredicate::Lt(value.clone()),
        "$lte" => FieldPredicate::Lte(value.clone()),
        "$in" => FieldPredicate::In(as_array(value, "$in")?),
        "$nin" => FieldPredicate::Nin(as_array(value, "$nin")?),
        "$exists" => FieldPredicate::Exists(value.as_bool().unwrap_or(true)),
        "$type" => FieldPredicate::Type(
            value
                .as_str()
                .ok_or_else(|| invalid_filter("$type requires a string value"))?
                .to_string(),
        ),
        "$startsWith" => FieldPredicate::StartsWith(
            value
                .as_str()
                .ok_or_else(|| invalid_filter("$startsWith requires a string value"))?
                .to_string(),
        ),
        "$endsWith" => FieldPredicate::EndsWith(
            value
                .as_str()
                .ok_or_else(|| invalid_filter("$endsWith requires a string value"))?
                .to_string(),
        ),
        "$contains" => FieldPredicate::Contains(
            value
                .as_str()
                .ok_or_else(|| invalid_filter("$contains requires a string value"))?
                .to_string(),
        ),
        "$all" => FieldPredicate::All(as_array(value, "$all")?),
        "$size" => FieldPredicate::Size(
            value.as_u64().ok_or_else(|| invalid_filter("$size requires a non-negative integer"))?,
        ),
        "$elemMatch" => FieldPredicate::ElemMatch(Box::new(Filter::parse(value)?)),
        other => FieldPredicate::Unknown(other.to_string()),
    })
}

fn parse_field_document(field: &str, doc: &Map<String, Value>) -> Result<Vec<FieldPredicate>, DbError> {
    let mut preds = Vec::new();
    if let Some(pattern) = doc.get("$regex") {
        let pattern = pattern
            .as_str()
            .ok_or_else(|| invalid_filter("$regex requires a string pattern"))?
            .to_string();
        let options = doc.get("$options").and_then(Value::as_str).unwrap_or("").to_string();
        preds.push(FieldPredicate::Regex { pattern, options });
    }
    for (op, value) in doc {
        if op == "$regex" || op == "$options" {
            continue;
        }
        preds.push(parse_field_predicate(op, value)?);
    }
    if preds.is_empty() {
        return Err(invalid_filter(format!("field '{field}' has an empty operator document")));
    }
    Ok(preds)
}

impl Filter {
    /// Parses a JSON filter document into an AST. Structural errors (wrong-shaped operator
    /// arguments) return `InvalidFilter`; unrecognized operators parse successfully into
    /// [`FieldPredicate::Unknown`] so [`Filter::validate`] can report them separately.
    pub fn parse(value: &Value) -> Result<Self, DbError> {
        let Some(obj) = value.as_object() else {
            return Err(invalid_filter("a filter document must be a JSON object"));
        };
        if obj.is_empty() {
            return Ok(Filter::MatchAll);
        }

        let mut clauses = Vec::new();
        for (key, val) in obj {
            let clause = match key.as_str() {
                "$and" => Filter::And(parse_logical_array("$and", val)?),
                "$or" => Filter::Or(parse_logical_array("$or", val)?),
                "$nor" => Filter::Nor(parse_logical_array("$nor", val)?),
                "$not" => Filter::Not(Box::new(Filter::parse(val)?)),
                "$vector" => Filter::Vector(parse_vector_clause(val)?),
                field => {
                    let preds = match val.as_object() {
                        Some(doc) if is_operator_document(doc) => parse_field_document(field, doc)?,
                        _ => vec![FieldPredicate::Eq(val.clone())],
                    };
                    Filter::Field(field.to_string(), preds)
                }
            };
            clauses.push(clause);
        }

        Ok(if clauses.len() == 1 { clauses.remove(0) } else { Filter::And(clauses) })
    }

    /// Every field path this filter reads from a row, including dotted-path prefixes and
    /// sub-operator fields like `$elemMatch`'s nested filter and `$vector`'s indexed field
    /// (spec §4.F "extract fields referenced").
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_referenced_fields(&mut out);
        out
    }

    fn collect_referenced_fields(&self, out: &mut Vec<String>) {
        match self {
            Filter::MatchAll => {}
            Filter::And(subs) | Filter::Or(subs) | Filter::Nor(subs) => {
                subs.iter().for_each(|f| f.collect_referenced_fields(out));
            }
            Filter::Not(sub) => sub.collect_referenced_fields(out),
            Filter::Vector(clause) => push_path_prefixes(&clause.field, out),
            Filter::Field(name, preds) => {
                push_path_prefixes(name, out);
                for pred in preds {
                    if let FieldPredicate::ElemMatch(sub) = pred {
                        sub.collect_referenced_fields(out);
                    }
                }
            }
        }
    }

    /// Walks the tree for [`FieldPredicate::Unknown`] operators, which row matching ignores
    /// silently but the API boundary must reject (spec §4.F).
    pub fn validate(&self) -> Result<(), DbError> {
        match self {
            Filter::MatchAll => Ok(()),
            Filter::And(subs) | Filter::Or(subs) | Filter::Nor(subs) => {
                subs.iter().try_for_each(Filter::validate)
            }
            Filter::Not(sub) => sub.validate(),
            Filter::Vector(_) => Ok(()),
            Filter::Field(name, preds) => {
                for pred in preds {
                    match pred {
                        FieldPredicate::Unknown(op) => {
                            return Err(invalid_filter(format!("unknown operator '{op}' on field '{name}'")))
                        }
                        FieldPredicate::ElemMatch(sub) => sub.validate()?,
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }
}

fn is_operator_document(doc: &Map<String, Value>) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

fn push_path_prefixes(path: &str, out: &mut Vec<String>) {
    let mut acc = String::new();
    for segment in path.split('.') {
        if !acc.is_empty() {
            acc.push('.');
        }
        acc.push_str(segment);
        out.push(acc.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_parses_to_match_all() {
        assert_eq!(Filter::parse(&json!({})).unwrap(), Filter::MatchAll);
    }

    #[test]
    fn bare_value_is_equality() {
        let filter = Filter::parse(&json!({"name": "alice"})).unwrap();
        assert_eq!(filter, Filter::Field("name".into(), vec![FieldPredicate::Eq(json!("alice"))]));
    }

    #[test]
    fn multiple_operators_on_one_field_combine() {
        let filter = Filter::parse(&json!({"age": {"$gte": 18, "$lt": 65}})).unwrap();
        match filter {
            Filter::Field(name, preds) => {
                assert_eq!(name, "age");
                assert_eq!(preds.len(), 2);
            }
            other => panic!("expected Field, got {other:?}"),
        }
    }

    #[test]
    fn regex_pairs_with_sibling_options() {
        let filter = Filter::parse(&json!({"title": {"$regex": "^foo", "$options": "i"}})).unwrap();
        assert_eq!(
            filter,
            Filter::Field(
                "title".into(),
                vec![FieldPredicate::Regex { pattern: "^foo".into(), options: "i".into() }]
            )
        );
    }

    #[test]
    fn and_or_nor_not_parse_recursively() {
        let filter = Filter::parse(&json!({"$and": [{"a": 1}, {"$or": [{"b": 2}, {"c": 3}]}]})).unwrap();
        match filter {
            Filter::And(subs) => assert_eq!(subs.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
        assert!(matches!(Filter::parse(&json!({"$not": {"a": 1}})).unwrap(), Filter::Not(_)));
    }

    #[test]
    fn vector_clause_parses_required_fields() {
        let filter =
            Filter::parse(&json!({"$vector": {"field": "embedding", "near": [0.1, 0.2], "k": 5}})).unwrap();
        assert_eq!(
            filter,
            Filter::Vector(VectorClause {
                field: "embedding".into(),
                near: vec![0.1, 0.2],
                k: 5,
                min_score: None
            })
        );
    }

    #[test]
    fn unknown_operator_parses_but_fails_validation() {
        let filter = Filter::parse(&json!({"age": {"$bogus": 1}})).unwrap();
        assert!(matches!(
            &filter,
            Filter::Field(_, preds) if matches!(preds[0], FieldPredicate::Unknown(_))
        ));
        let err = filter.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFilter);
    }

    #[test]
    fn referenced_fields_include_dotted_prefixes_and_elem_match() {
        let filter = Filter::parse(&json!({
            "address.city": "Chicago",
            "items": {"$elemMatch": {"price": {"$gt": 5}}}
        }))
        .unwrap();
        let fields = filter.referenced_fields();
        assert!(fields.contains(&"address".to_string()));
        assert!(fields.contains(&"address.city".to_string()));
        assert!(fields.contains(&"price".to_string()));
    }

    #[test]
    fn non_object_filter_is_rejected() {
        assert_eq!(Filter::parse(&json!(5)).unwrap_err().code, ErrorCode::InvalidFilter);
    }
}
