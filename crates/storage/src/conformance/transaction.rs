use serde_json::json;

use super::{check, err, row, TestResult};
use crate::{Query, RecordStore, StorageError};

pub(super) fn run_transaction_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: RecordStore,
    F: Fn() -> S,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "transaction",
        "commit_keeps_changes",
        commit_keeps_changes(factory),
    ));
    results.push(TestResult::from_result(
        "transaction",
        "rollback_discards_changes",
        rollback_discards_changes(factory),
    ));
    results.push(TestResult::from_result(
        "transaction",
        "rollback_keeps_autonomous_writes",
        rollback_keeps_autonomous_writes(factory),
    ));
    results.push(TestResult::from_result(
        "transaction",
        "ids_after_rollback_skip_autonomous_rows",
        ids_after_rollback_skip_autonomous_rows(factory),
    ));
    results.push(TestResult::from_result(
        "transaction",
        "nested_begin_is_rejected",
        nested_begin_is_rejected(factory),
    ));
    results.push(TestResult::from_result(
        "transaction",
        "commit_without_begin_is_rejected",
        commit_without_begin_is_rejected(factory),
    ));

    results
}

// ── 1. Committed writes stay ─────────────────────────────────────────────────

fn commit_keeps_changes<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    s.begin().map_err(err)?;
    let id = s.create("job", row(json!({"state": "started"}))).map_err(err)?;
    s.commit().map_err(err)?;
    check(!s.in_transaction(), || "transaction still open".into())?;
    check(s.exists("job", id).map_err(err)?, || "committed row missing".into())
}

// ── 2. Rolled back creates, writes and deletes all revert ────────────────────

fn rollback_discards_changes<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    let kept = s.create("job", row(json!({"state": "enqueued"}))).map_err(err)?;
    let doomed = s.create("job", row(json!({"state": "enqueued"}))).map_err(err)?;
    s.begin().map_err(err)?;
    s.write("job", kept, row(json!({"state": "started"})))
        .map_err(err)?;
    s.delete("job", doomed).map_err(err)?;
    let fresh = s.create("job", row(json!({}))).map_err(err)?;
    s.rollback().map_err(err)?;

    let state = s.read("job", kept).map_err(err)?.values["state"].clone();
    check(state == "enqueued", || format!("write survived rollback: {state}"))?;
    check(s.exists("job", doomed).map_err(err)?, || "delete survived rollback".into())?;
    check(!s.exists("job", fresh).map_err(err)?, || "create survived rollback".into())
}

// ── 3. Autonomous rows outlive the rollback ──────────────────────────────────

fn rollback_keeps_autonomous_writes<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    s.begin().map_err(err)?;
    s.create("job", row(json!({}))).map_err(err)?;
    let log = s
        .create_autonomous("log", row(json!({"message": "kept"})))
        .map_err(err)?;
    s.rollback().map_err(err)?;
    let r = s.read("log", log).map_err(err)?;
    check(r.values["message"] == "kept", || format!("got {:?}", r.values))?;
    let jobs = s.search("job", &Query::new()).map_err(err)?;
    check(jobs.is_empty(), || "non-autonomous row survived".into())
}

// ── 4. A later create does not collide with a replayed autonomous id ─────────

fn ids_after_rollback_skip_autonomous_rows<S: RecordStore, F: Fn() -> S>(
    factory: &F,
) -> Result<(), String> {
    let s = factory();
    s.begin().map_err(err)?;
    s.create("log", row(json!({"message": "lost"}))).map_err(err)?;
    let kept = s
        .create_autonomous("log", row(json!({"message": "kept"})))
        .map_err(err)?;
    s.rollback().map_err(err)?;
    let next = s.create("log", row(json!({"message": "next"}))).map_err(err)?;
    check(next > kept, || format!("id {next} collides with autonomous {kept}"))?;
    let r = s.read("log", kept).map_err(err)?;
    check(r.values["message"] == "kept", || "autonomous row overwritten".into())
}

// ── 5. Only one transaction at a time ────────────────────────────────────────

fn nested_begin_is_rejected<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    s.begin().map_err(err)?;
    match s.begin() {
        Err(StorageError::TransactionActive) => Ok(()),
        other => Err(format!("expected TransactionActive, got {:?}", other)),
    }
}

// ── 6. commit and rollback need an open transaction ──────────────────────────

fn commit_without_begin_is_rejected<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    match (s.commit(), s.rollback()) {
        (Err(StorageError::NoTransaction), Err(StorageError::NoTransaction)) => Ok(()),
        other => Err(format!("expected NoTransaction twice, got {:?}", other)),
    }
}
