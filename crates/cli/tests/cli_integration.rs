//! CLI integration tests.
//!
//! Uses `assert_cmd` to spawn the `tether` binary against a state file in a
//! temporary directory and checks exit codes, stdout and stderr.

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A `tether` command whose state and config live in `dir`.
fn tether(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("tether");
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .args(["--state", "state.json", "--config", "tether.toml"]);
    cmd
}

const SYNC_TASK: &str = r#""""
TITLE: Sync partners
MAGIC_BUTTON: Sync now
"""

def handle_button():
    partner = create_record("res.partner", {"name": "Ada"})
    partner.set_link("crm_contact", "crm-42")
    log("linked " + partner.name)
"#;

const FAILING_TASK: &str = r#""""
TITLE: Broken
"""

def handle_button():
    raise UserError("nothing to sync")
"#;

/// A bundle directory with one button task and one secret.
fn bundle(dir: &Path, task: &str) {
    let bundle = dir.join("bundle");
    fs::create_dir_all(&bundle).unwrap();
    fs::write(bundle.join("README.md"), "# Partners\n").unwrap();
    fs::write(bundle.join("task.sync.py"), task).unwrap();
    fs::write(
        bundle.join("settings.secrets.markdown"),
        "---\nTOKEN: abc123\n---\n",
    )
    .unwrap();
    fs::write(
        bundle.join("bundle.toml"),
        "description = \"Partners\"\nupdated_at = \"2024-03-01T10:00:00Z\"\n",
    )
    .unwrap();
}

fn upgraded(task: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    bundle(dir.path(), task);
    tether(dir.path())
        .args(["model", "res.partner", "--fields", "name,email"])
        .assert()
        .success();
    tether(dir.path())
        .args(["upgrade", "bundle"])
        .assert()
        .success()
        .stdout(predicate::str::contains("project 1 \"Partners\" upgraded: 1 task(s)"));
    dir
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    let dir = TempDir::new().unwrap();
    tether(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tether sync engine"));
}

#[test]
fn version_exits_0() {
    let dir = TempDir::new().unwrap();
    tether(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tether"));
}

// ──────────────────────────────────────────────
// 2. Check
// ──────────────────────────────────────────────

#[test]
fn check_valid_script_exits_0() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("ok.py"), "def handle_button():\n    pass\n").unwrap();
    tether(dir.path())
        .args(["check", "ok.py"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn check_forbidden_import_exits_1() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bad.py"), "import os\n").unwrap();
    tether(dir.path())
        .args(["check", "bad.py"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("line 1: import of 'os' is not allowed"))
        .stderr(predicate::str::contains("1 problem(s) found"));
}

#[test]
fn private_attributes_need_the_elevated_ruleset() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("core.py"), "x = PARAMS._cache\n").unwrap();
    tether(dir.path())
        .args(["check", "core.py"])
        .assert()
        .failure();
    tether(dir.path())
        .args(["check", "core.py", "--elevated"])
        .assert()
        .success();
}

#[test]
fn check_json_output_lists_problems() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bad.py"), "global x\n").unwrap();
    let output = tether(dir.path())
        .args(["--output", "json", "check", "bad.py"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["valid"], false);
    assert_eq!(report["problems"][0]["line"], 1);
}

#[test]
fn missing_file_exits_1() {
    let dir = TempDir::new().unwrap();
    tether(dir.path())
        .args(["check", "nope.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not read 'nope.py'"));
}

// ──────────────────────────────────────────────
// 3. Upgrade, run and links
// ──────────────────────────────────────────────

#[test]
fn button_run_creates_a_link() {
    let dir = upgraded(SYNC_TASK);
    tether(dir.path())
        .args(["run", "button", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("job 1 handle_button: Done"));

    let output = tether(dir.path())
        .args(["--output", "json", "links", "1", "--relation", "crm_contact"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let links: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(links.as_array().unwrap().len(), 1);
    assert_eq!(links[0]["record"]["model"], "res.partner");

    tether(dir.path())
        .args(["links", "1", "--ref", "crm-42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("crm_contact\tres.partner(1)"));
    tether(dir.path())
        .args(["links", "1", "--ref", "crm-7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no links"));
}

#[test]
fn failed_job_exits_1_with_its_error() {
    let dir = upgraded(FAILING_TASK);
    tether(dir.path())
        .args(["run", "button", "1"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Failed"))
        .stderr(predicate::str::contains("nothing to sync"));
}

#[test]
fn upgrading_again_keeps_one_task() {
    let dir = upgraded(SYNC_TASK);
    tether(dir.path())
        .args(["upgrade", "bundle", "--project", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 task(s)"));
}

// ──────────────────────────────────────────────
// 4. Secrets and orders
// ──────────────────────────────────────────────

#[test]
fn secrets_are_revealed_to_managers_only() {
    let dir = upgraded(SYNC_TASK);
    tether(dir.path())
        .args(["secret", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Only managers can reveal secret values."));
    tether(dir.path())
        .args(["secret", "1", "--manager"])
        .assert()
        .success()
        .stdout(predicate::str::contains("abc123"));
}

#[test]
fn orders_follow_their_state_machine() {
    let dir = upgraded(SYNC_TASK);
    tether(dir.path())
        .args(["order", "create", "1", "--name", "March"])
        .assert()
        .success()
        .stdout(predicate::str::contains("order 1 \"March\": Draft"));
    tether(dir.path())
        .args(["order", "confirm", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Open"));
    tether(dir.path())
        .args(["order", "confirm", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot confirm order 'March'"));
    tether(dir.path())
        .args(["order", "cancel", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cancel"));
}
