use serde_json::json;

use super::{check, err, row, TestResult};
use crate::{Query, RecordStore};

pub(super) fn run_search_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: RecordStore,
    F: Fn() -> S,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "search",
        "search_unknown_table_is_empty",
        search_unknown_table_is_empty(factory),
    ));
    results.push(TestResult::from_result(
        "search",
        "search_filters_by_equality",
        search_filters_by_equality(factory),
    ));
    results.push(TestResult::from_result(
        "search",
        "search_filters_by_membership",
        search_filters_by_membership(factory),
    ));
    results.push(TestResult::from_result(
        "search",
        "search_follows_dotted_paths",
        search_follows_dotted_paths(factory),
    ));
    results.push(TestResult::from_result(
        "search",
        "search_orders_by_id_and_limits",
        search_orders_by_id_and_limits(factory),
    ));

    results
}

fn seed<S: RecordStore>(s: &S) -> Result<(), String> {
    for (project, key) in [(1, "a"), (2, "b"), (1, "c")] {
        s.create("param", row(json!({"project_id": project, "key": key})))
            .map_err(err)?;
    }
    Ok(())
}

fn keys(rows: &[crate::Row]) -> Vec<String> {
    rows.iter()
        .map(|r| r.values["key"].as_str().unwrap_or_default().to_string())
        .collect()
}

// ── 1. Searching a table that never had rows returns nothing ─────────────────

fn search_unknown_table_is_empty<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    let rows = s.search("nothing", &Query::new()).map_err(err)?;
    check(rows.is_empty(), || format!("expected no rows, got {}", rows.len()))
}

// ── 2. Eq narrows to matching rows ───────────────────────────────────────────

fn search_filters_by_equality<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    seed(&s)?;
    let rows = s
        .search("param", &Query::new().eq("project_id", 1))
        .map_err(err)?;
    check(keys(&rows) == ["a", "c"], || format!("got {:?}", keys(&rows)))
}

// ── 3. In matches any listed value ───────────────────────────────────────────

fn search_filters_by_membership<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    seed(&s)?;
    let rows = s
        .search("param", &Query::new().is_in("key", ["b", "c", "z"]))
        .map_err(err)?;
    check(keys(&rows) == ["b", "c"], || format!("got {:?}", keys(&rows)))
}

// ── 4. Conditions reach into nested objects ──────────────────────────────────

fn search_follows_dotted_paths<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    s.create(
        "link",
        row(json!({"record": {"model": "res.partner", "id": 42}, "refs": {"external": "gh#1"}})),
    )
    .map_err(err)?;
    s.create("link", row(json!({"record": null, "refs": {"github": "gh#1"}})))
        .map_err(err)?;
    let by_model = s
        .search("link", &Query::new().eq("record.model", "res.partner"))
        .map_err(err)?;
    let by_ref = s
        .search("link", &Query::new().eq("refs.github", "gh#1"))
        .map_err(err)?;
    check(by_model.len() == 1 && by_ref.len() == 1, || {
        format!("by_model {}, by_ref {}", by_model.len(), by_ref.len())
    })
}

// ── 5. Results come back in id order, truncated by limit ─────────────────────

fn search_orders_by_id_and_limits<S: RecordStore, F: Fn() -> S>(factory: &F) -> Result<(), String> {
    let s = factory();
    seed(&s)?;
    let rows = s.search("param", &Query::new().limit(2)).map_err(err)?;
    let ids: Vec<_> = rows.iter().map(|r| r.id).collect();
    check(ids == [1, 2], || format!("got ids {:?}", ids))
}
