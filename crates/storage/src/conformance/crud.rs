use serde_json::json;

use super::{check, err, row, TestResult};
use crate::{RecordStore, StorageError};

pub(super) fn run_crud_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: RecordStore,
    F: Fn() -> S,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "crud",
        "create_assigns_ascending_ids",
        create_assigns_ascending_ids(factory),
    ));
    results.push(TestResult::from_result(
        "crud",
        "ids_are_per_table",
        ids_are_per_table(factory),
    ));
    results.push(TestResult::from_result(
        "crud",
        "create_ignores_supplied_id",
        create_ignores_supplied_id(factory),
    ));
    results.push(TestResult::from_result(
        "crud",
        "write_merges_fields",
        write_merges_fields(factory),
    ));
    results.push(TestResult::from_result(
        "crud",
        "read_missing_returns_not_found",
        read_missing_returns_not_found(factory),
    ));
    results.push(TestResult::from_result(
        "crud",
        "write_missing_returns_not_found",
        write_missing_returns_not_found(factory),
    ));
    results.push(TestResult::from_result(
        "crud",
        "delete_removes_row",
        delete_removes_row(factory),
    ));
    results.push(TestResult::from_result(
        "crud",
        "deleted_ids_are_not_reused",
        deleted_ids_are_not_reused(factory),
    ));

    results
}

// ── 1. Ids ascend from 1 within a table ──────────────────────────────────────

fn create_assigns_ascending_ids<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    let a = s.create("task", row(json!({"name": "a"}))).map_err(err)?;
    let b = s.create("task", row(json!({"name": "b"}))).map_err(err)?;
    check(a == 1 && b == 2, || format!("expected ids 1, 2; got {a}, {b}"))
}

// ── 2. Tables number their rows independently ────────────────────────────────

fn ids_are_per_table<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    s.create("task", row(json!({}))).map_err(err)?;
    let other = s.create("job", row(json!({}))).map_err(err)?;
    check(other == 1, || format!("expected first job id 1, got {other}"))
}

// ── 3. An `id` key in the values is not stored ───────────────────────────────

fn create_ignores_supplied_id<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    let id = s
        .create("task", row(json!({"id": 99, "name": "a"})))
        .map_err(err)?;
    let r = s.read("task", id).map_err(err)?;
    check(id == 1 && !r.values.contains_key("id"), || {
        format!("id {id}, values {:?}", r.values)
    })
}

// ── 4. write keeps fields it does not mention ────────────────────────────────

fn write_merges_fields<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    let id = s
        .create("param", row(json!({"key": "k", "value": "old"})))
        .map_err(err)?;
    s.write("param", id, row(json!({"value": "new"})))
        .map_err(err)?;
    let r = s.read("param", id).map_err(err)?;
    check(r.values["key"] == "k" && r.values["value"] == "new", || {
        format!("unexpected row {:?}", r.values)
    })
}

// ── 5. Reading a missing row is NotFound with table and id ───────────────────

fn read_missing_returns_not_found<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    match s.read("link", 42) {
        Err(StorageError::NotFound { table, id }) if table == "link" && id == 42 => Ok(()),
        other => Err(format!("expected NotFound(link/42), got {:?}", other)),
    }
}

// ── 6. Writing a missing row is NotFound ─────────────────────────────────────

fn write_missing_returns_not_found<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    match s.write("link", 1, row(json!({"a": 1}))) {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {:?}", other)),
    }
}

// ── 7. delete removes the row and reports missing rows ───────────────────────

fn delete_removes_row<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    let id = s.create("task", row(json!({}))).map_err(err)?;
    s.delete("task", id).map_err(err)?;
    check(!s.exists("task", id).map_err(err)?, || {
        "row still exists after delete".into()
    })?;
    match s.delete("task", id) {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound on second delete, got {:?}", other)),
    }
}

// ── 8. Ids of deleted rows are never handed out again ────────────────────────

fn deleted_ids_are_not_reused<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    s.create("task", row(json!({}))).map_err(err)?;
    let b = s.create("task", row(json!({}))).map_err(err)?;
    s.delete("task", b).map_err(err)?;
    let c = s.create("task", row(json!({}))).map_err(err)?;
    check(c > b, || format!("id {c} reused after deleting {b}"))
}
