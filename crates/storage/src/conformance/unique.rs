use serde_json::json;

use super::{check, err, row, TestResult};
use crate::{Query, RecordStore, StorageError};

pub(super) fn run_unique_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: RecordStore,
    F: Fn() -> S,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "unique",
        "duplicate_create_is_rejected",
        duplicate_create_is_rejected(factory),
    ));
    results.push(TestResult::from_result(
        "unique",
        "partial_overlap_is_allowed",
        partial_overlap_is_allowed(factory),
    ));
    results.push(TestResult::from_result(
        "unique",
        "write_into_duplicate_is_rejected",
        write_into_duplicate_is_rejected(factory),
    ));
    results.push(TestResult::from_result(
        "unique",
        "rewriting_same_row_is_allowed",
        rewriting_same_row_is_allowed(factory),
    ));
    results.push(TestResult::from_result(
        "unique",
        "nested_values_compare_whole",
        nested_values_compare_whole(factory),
    ));

    results
}

fn keyed<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<S, String> {
    let s = factory();
    s.define_unique("param", &["project_id", "key"]).map_err(err)?;
    s.define_unique("param", &["project_id", "key"]).map_err(err)?;
    Ok(s)
}

// ── 1. Second row with the same key fails and is not stored ──────────────────

fn duplicate_create_is_rejected<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = keyed(factory)?;
    s.create("param", row(json!({"project_id": 1, "key": "a"})))
        .map_err(err)?;
    match s.create("param", row(json!({"project_id": 1, "key": "a"}))) {
        Err(StorageError::UniqueViolation { table, .. }) if table == "param" => {}
        other => return Err(format!("expected UniqueViolation, got {:?}", other)),
    }
    let n = s.search("param", &Query::new()).map_err(err)?.len();
    check(n == 1, || format!("expected 1 row, got {n}"))
}

// ── 2. Sharing only part of the key is fine ──────────────────────────────────

fn partial_overlap_is_allowed<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = keyed(factory)?;
    s.create("param", row(json!({"project_id": 1, "key": "a"})))
        .map_err(err)?;
    s.create("param", row(json!({"project_id": 2, "key": "a"})))
        .map_err(err)?;
    s.create("param", row(json!({"project_id": 1, "key": "b"})))
        .map_err(err)?;
    Ok(())
}

// ── 3. A write may not produce a duplicate either ────────────────────────────

fn write_into_duplicate_is_rejected<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = keyed(factory)?;
    s.create("param", row(json!({"project_id": 1, "key": "a"})))
        .map_err(err)?;
    let b = s
        .create("param", row(json!({"project_id": 1, "key": "b"})))
        .map_err(err)?;
    match s.write("param", b, row(json!({"key": "a"}))) {
        Err(StorageError::UniqueViolation { .. }) => {}
        other => return Err(format!("expected UniqueViolation, got {:?}", other)),
    }
    let r = s.read("param", b).map_err(err)?;
    check(r.values["key"] == "b", || "rejected write was applied".into())
}

// ── 4. A row never conflicts with itself ─────────────────────────────────────

fn rewriting_same_row_is_allowed<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = keyed(factory)?;
    let a = s
        .create("param", row(json!({"project_id": 1, "key": "a"})))
        .map_err(err)?;
    s.write("param", a, row(json!({"key": "a", "value": "x"})))
        .map_err(err)
}

// ── 5. Object-valued key fields are compared structurally ────────────────────

fn nested_values_compare_whole<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    s.define_unique("link", &["relation", "refs"]).map_err(err)?;
    s.create("link", row(json!({"relation": "r", "refs": {"a": "1", "b": "2"}})))
        .map_err(err)?;
    s.create("link", row(json!({"relation": "r", "refs": {"a": "1", "b": "3"}})))
        .map_err(err)?;
    match s.create("link", row(json!({"relation": "r", "refs": {"b": "2", "a": "1"}}))) {
        Err(StorageError::UniqueViolation { .. }) => Ok(()),
        other => Err(format!("expected UniqueViolation, got {:?}", other)),
    }
}
