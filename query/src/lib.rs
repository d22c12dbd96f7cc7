//! MongoDB-dialect filter AST, file-level pruning, and row-predicate evaluation (spec §4.F),
//! plus the variant-shredding path rewrite that lets shredded fields participate in both.
//!
//! The teacher's `predicate`/`query_functions` crates compile a user-facing expression down to a
//! DataFusion physical plan; this crate does the same job at a much smaller scale — a filter
//! document compiles to a plain Rust closure over `serde_json::Value`, and pruning walks
//! `parquet_file::FileStatistics` directly instead of going through a cost-based optimizer.
#![warn(missing_docs)]

mod eval;
mod filter;
mod plan;

pub use eval::compare_values;
pub use filter::{FieldPredicate, Filter, VectorClause};
pub use plan::{prune_by_bloom, prune_by_stats};

use variant::ShreddingConfig;

/// Rewrites every field path this filter reads through [`variant::rewrite_filter_path`], so a
/// filter written against logical dotted paths (`price`) transparently reads a shredded
/// collection's physical `price.typed_value` column instead (spec §4.F "Variant shredding
/// integration"). Fields `config` doesn't shred pass through unchanged.
pub fn rewrite_for_shredding(filter: &Filter, config: &ShreddingConfig) -> Filter {
    rewrite_filter(filter, config)
}

fn rewrite_filter(filter: &Filter, config: &ShreddingConfig) -> Filter {
    match filter {
        Filter::MatchAll => Filter::MatchAll,
        Filter::And(subs) => Filter::And(subs.iter().map(|f| rewrite_filter(f, config)).collect()),
        Filter::Or(subs) => Filter::Or(subs.iter().map(|f| rewrite_filter(f, config)).collect()),
        Filter::Nor(subs) => Filter::Nor(subs.iter().map(|f| rewrite_filter(f, config)).collect()),
        Filter::Not(sub) => Filter::Not(Box::new(rewrite_filter(sub, config))),
        Filter::Vector(clause) => Filter::Vector(clause.clone()),
        Filter::Field(name, preds) => {
            let rewritten_name = variant::rewrite_filter_path(config, name);
            let rewritten_preds = preds
                .iter()
                .map(|p| match p {
                    FieldPredicate::ElemMatch(sub) => {
                        FieldPredicate::ElemMatch(Box::new(rewrite_filter(sub, config)))
                    }
                    other => other.clone(),
                })
                .collect();
            Filter::Field(rewritten_name, rewritten_preds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shredded_field_path_is_rewritten_before_matching() {
        let mut config = ShreddingConfig::new(10);
        config.mark_shredded("price");
        let filter = Filter::parse(&json!({"price": {"$gt": 5}})).unwrap();
        let rewritten = rewrite_for_shredding(&filter, &config);
        match &rewritten {
            Filter::Field(name, _) => assert_eq!(name, "price.typed_value"),
            other => panic!("expected Field, got {other:?}"),
        }
        let row = json!({"price": variant::ShreddedValue::shred(&json!(10)).to_row_value()});
        assert!(rewritten.matches(&row));
        let low_row = json!({"price": variant::ShreddedValue::shred(&json!(1)).to_row_value()});
        assert!(!rewritten.matches(&low_row));
    }

    #[test]
    fn unshredded_field_path_passes_through() {
        let config = ShreddingConfig::new(10);
        let filter = Filter::parse(&json!({"name": "alice"})).unwrap();
        let rewritten = rewrite_for_shredding(&filter, &config);
        assert_eq!(rewritten, filter);
    }
}
