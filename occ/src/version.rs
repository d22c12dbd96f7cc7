//! Entity-level optimistic version checks (spec §4.E).

use dberror::{DbError, ErrorCode};

/// Checks a write's `expected_version` against the entity's current version.
///
/// `expected` of `None` means "last-writer-wins" — the write always proceeds (still atomic with
/// respect to a single event, just not conditioned on the prior version). `namespace`/
/// `entity_id` are attached to the resulting error's context when present, matching the spec's
/// `VersionConflict { expected, actual, namespace?, entity_id? }` shape.
pub fn check_expected_version(
    current: u64,
    expected: Option<u64>,
    namespace: Option<&str>,
    entity_id: Option<&str>,
) -> Result<(), DbError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    if expected == current {
        return Ok(());
    }

    let mut err = DbError::new(
        ErrorCode::VersionConflict,
        format!("expected version {expected}, found {current}"),
    )
    .with_context("expected", expected.to_string())
    .with_context("actual", current.to_string());
    if let Some(ns) = namespace {
        err = err.with_context("namespace", ns);
    }
    if let Some(id) = entity_id {
        err = err.with_context("entityId", id);
    }
    Err(err)
}

/// The version a successful write bumps `current` to. Always exactly one more than the previous
/// version (spec §4.E: "Successful write increments `version` by exactly one").
pub fn next_version(current: u64) -> u64 {
    current + 1
}
