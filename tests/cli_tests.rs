//! Integration tests for the Conveyor CLI
//!
//! These tests run the actual CLI binary and verify output.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get the binary to test
fn conveyor_cmd() -> Command {
    Command::cargo_bin("conveyor").unwrap()
}

fn write_pipeline(dir: &TempDir, name: &str, yaml: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, yaml).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn test_help_flag() {
    conveyor_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "dependency-driven CI/CD pipeline engine",
        ));
}

#[test]
fn test_run_help() {
    conveyor_cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--runner"))
        .stdout(predicate::str::contains("--concurrency"))
        .stdout(predicate::str::contains("--events-out"));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validate_valid_pipeline() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "ci.yaml",
        r#"
name: build-and-deploy
on: [push]
jobs:
  - id: lint
    steps:
      - run: cargo clippy
  - id: test
    steps:
      - run: cargo test
  - id: deploy
    needs: [lint, test]
    steps:
      - uses: deploy
        with:
          target: prod
"#,
    );

    conveyor_cmd()
        .args(["validate", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("Jobs: 3"));
}

#[test]
fn test_validate_unknown_needs() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "bad.yaml",
        r#"
name: bad
jobs:
  - id: deploy
    needs: ghost
    steps:
      - run: "true"
"#,
    );

    conveyor_cmd()
        .args(["validate", &file])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CNV-012"))
        .stderr(predicate::str::contains("Fix:"));
}

#[test]
fn test_validate_cycle_names_the_path() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "loopy.yaml",
        r#"
name: loopy
jobs:
  - id: a
    needs: b
    steps: [{run: "true"}]
  - id: b
    needs: a
    steps: [{run: "true"}]
"#,
    );

    conveyor_cmd()
        .args(["validate", &file])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CNV-020"))
        .stderr(predicate::str::contains("a"))
        .stderr(predicate::str::contains("b"));
}

#[test]
fn test_validate_duplicate_job_id() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "dup.yaml",
        r#"
name: dup
jobs:
  - id: build
    steps: [{run: "true"}]
  - id: build
    steps: [{run: "true"}]
"#,
    );

    conveyor_cmd()
        .args(["validate", &file])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CNV-011"));
}

#[test]
fn test_validate_missing_file() {
    conveyor_cmd()
        .args(["validate", "no-such-pipeline.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

// ============================================================================
// Graph
// ============================================================================

#[test]
fn test_graph_prints_execution_order() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "diamond.yaml",
        r#"
name: diamond
jobs:
  - id: a
    steps: [{run: "true"}]
  - id: b
    needs: a
    steps: [{run: "true"}]
  - id: c
    needs: a
    steps: [{run: "true"}]
  - id: d
    needs: [b, c]
    steps: [{run: "true"}]
"#,
    );

    conveyor_cmd()
        .args(["graph", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. a"))
        .stdout(predicate::str::contains("4. d"))
        .stdout(predicate::str::contains("needs: b, c"));
}

// ============================================================================
// Run
// ============================================================================

#[test]
fn test_run_local_pipeline() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "hello.yaml",
        r#"
name: hello
jobs:
  - id: greet
    steps:
      - run: echo hello
"#,
    );

    conveyor_cmd()
        .args(["run", &file])
        .assert()
        .success()
        .stdout(predicate::str::contains("greet"))
        .stdout(predicate::str::contains("succeeded"))
        .stdout(predicate::str::contains("Run completed"));
}

#[test]
fn test_run_failure_exits_nonzero_and_skips_dependents() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "failing.yaml",
        r#"
name: failing
jobs:
  - id: test
    steps:
      - run: "exit 1"
  - id: deploy
    needs: test
    steps:
      - run: echo deploying
"#,
    );

    conveyor_cmd()
        .args(["run", &file])
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("skipped"))
        .stdout(predicate::str::contains("Run failed"));
}

#[test]
fn test_run_with_runner_override() {
    let temp_dir = TempDir::new().unwrap();
    // fail under sh, succeeds under the mock runner's scripting
    let file = write_pipeline(
        &temp_dir,
        "mocked.yaml",
        r#"
name: mocked
jobs:
  - id: build
    steps:
      - run: "ok:built"
"#,
    );

    conveyor_cmd()
        .args(["run", &file, "--runner", "mock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded"));
}

#[test]
fn test_run_unknown_runner() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "weird.yaml",
        r#"
name: weird
jobs:
  - id: build
    runs-on: mainframe
    steps:
      - run: echo hi
"#,
    );

    conveyor_cmd()
        .args(["run", &file])
        .assert()
        .failure()
        .stdout(predicate::str::contains("CNV-030"));
}

#[test]
fn test_run_env_flag_reaches_steps() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "env.yaml",
        r#"
name: env-check
jobs:
  - id: check
    steps:
      - run: test "$TARGET" = prod
"#,
    );

    conveyor_cmd()
        .args(["run", &file, "--env", "TARGET=prod"])
        .assert()
        .success();

    conveyor_cmd()
        .args(["run", &file, "--env", "TARGET=staging"])
        .assert()
        .failure();
}

#[test]
fn test_run_env_condition_skips_job() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "cond.yaml",
        r#"
name: conditional
jobs:
  - id: deploy
    if: "env.BRANCH == 'main'"
    steps:
      - run: echo deploying
"#,
    );

    conveyor_cmd()
        .args(["run", &file, "--env", "BRANCH=feature"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped"));
}

#[test]
fn test_run_writes_event_log() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "events.yaml",
        r#"
name: evented
jobs:
  - id: greet
    steps:
      - run: echo hi
"#,
    );
    let events_path = temp_dir.path().join("events.json");

    conveyor_cmd()
        .args([
            "run",
            &file,
            "--events-out",
            events_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    let json = fs::read_to_string(&events_path).unwrap();
    assert!(json.contains("run_started"));
    assert!(json.contains("job_completed"));
    assert!(json.contains("run_completed"));
}

#[test]
fn test_run_timeout_cancels() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "slow.yaml",
        r#"
name: slow
jobs:
  - id: stall
    steps:
      - run: sleep 10
"#,
    );

    conveyor_cmd()
        .args(["run", &file, "--timeout", "200ms"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("cancelled"));
}

#[test]
fn test_run_rejects_zero_concurrency() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_pipeline(
        &temp_dir,
        "any.yaml",
        r#"
name: any
jobs:
  - id: a
    steps: [{run: "true"}]
"#,
    );

    conveyor_cmd()
        .args(["run", &file, "--concurrency", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CNV-017"));
}
