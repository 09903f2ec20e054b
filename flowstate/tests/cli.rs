//! CLI tests for the `flowstate` binary.
//!
//! Spawns the binary against temp workspaces and checks exit codes and the
//! JSON printed on stdout.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use flowstate::exit_codes;
use serde_json::Value;

fn flowstate(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_flowstate"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("run flowstate")
}

fn json_of(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not JSON ({err}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

fn init(root: &Path) {
    let output = flowstate(root, &["init", "--phase", "implement"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
}

fn create(root: &Path, id: &str, priority: &str, deps: &[&str]) {
    let mut args = vec!["task", "create", "--id", id, "--description", "work", "--priority", priority];
    for dep in deps {
        args.extend(["--depends", *dep]);
    }
    let output = flowstate(root, &args);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
}

#[test]
fn commands_require_an_initialized_workspace() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = flowstate(temp.path(), &["task", "list"]);
    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    assert!(String::from_utf8_lossy(&output.stderr).contains("flowstate init"));
}

#[test]
fn init_twice_without_force_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    let output = flowstate(temp.path(), &["init"]);
    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    let output = flowstate(temp.path(), &["init", "--force"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[test]
fn next_reports_no_task_with_its_own_exit_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    create(temp.path(), "demo.a", "1", &[]);
    create(temp.path(), "demo.b", "0", &["demo.a"]);

    let output = flowstate(temp.path(), &["task", "next"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(json_of(&output)["id"], "demo.a");

    for args in [["task", "start", "demo.a"], ["task", "done", "demo.a"]] {
        assert_eq!(flowstate(temp.path(), &args).status.code(), Some(exit_codes::OK));
    }
    assert_eq!(json_of(&flowstate(temp.path(), &["task", "next"]))["id"], "demo.b");

    for args in [["task", "start", "demo.b"], ["task", "done", "demo.b"]] {
        assert_eq!(flowstate(temp.path(), &args).status.code(), Some(exit_codes::OK));
    }
    let output = flowstate(temp.path(), &["task", "next"]);
    assert_eq!(output.status.code(), Some(exit_codes::NO_TASK));
    assert_eq!(json_of(&output), Value::Null);
}

#[test]
fn domain_errors_print_a_stable_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    create(temp.path(), "demo.a", "0", &[]);

    let output = flowstate(temp.path(), &["task", "done", "demo.a"]);
    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    assert_eq!(json_of(&output)["error"]["code"], "INVALID_TRANSITION");

    let output = flowstate(
        temp.path(),
        &["task", "create", "--id", "demo.a", "--description", "again"],
    );
    assert_eq!(json_of(&output)["error"]["code"], "DUPLICATE_ID");
}

/// Verifies an atomic batch read from stdin reports the rollback and exits with an error.
#[test]
fn batch_from_stdin_rolls_back_atomically() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    create(temp.path(), "b.one", "0", &[]);
    create(temp.path(), "b.two", "0", &[]);

    let mut child = Command::new(env!("CARGO_BIN_EXE_flowstate"))
        .arg("--root")
        .arg(temp.path())
        .args(["task", "batch", "-", "--atomic"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(br#"[{"kind":"start","taskId":"b.one"},{"kind":"done","taskId":"b.two"}]"#)
        .expect("write ops");
    let output = child.wait_with_output().expect("wait");

    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    let outcome = json_of(&output);
    assert_eq!(outcome["committed"], false);
    assert_eq!(outcome["results"][0]["outcome"], "rolled_back");
    assert_eq!(outcome["results"][1]["code"], "INVALID_TRANSITION");

    let shown = json_of(&flowstate(temp.path(), &["task", "show", "b.one"]));
    assert_eq!(shown["status"], "pending");
}

/// Verifies a blocked archive uses its own exit code.
#[test]
fn archive_blocked_until_complete() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());

    let output = flowstate(temp.path(), &["state", "archive"]);
    assert_eq!(output.status.code(), Some(exit_codes::ARCHIVE_BLOCKED));
    assert_eq!(json_of(&output)["outcome"], "blocked");
    assert_eq!(json_of(&output)["phase"], "implement");

    for phase in ["deliver", "complete"] {
        let output = flowstate(temp.path(), &["state", "phase", phase]);
        assert_eq!(output.status.code(), Some(exit_codes::OK));
    }
    let output = flowstate(temp.path(), &["state", "archive"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(json_of(&output)["outcome"], "archived");
}

#[test]
fn invalid_phase_move_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    let output = flowstate(temp.path(), &["state", "phase", "clarify"]);
    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    assert_eq!(json_of(&output)["error"]["code"], "INVALID_TRANSITION");
}

/// Verifies thresholds are read from `config.toml` and breakers are per name.
#[test]
fn heal_breaker_opens_after_configured_failures() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    std::fs::write(
        temp.path().join(".flow/config.toml"),
        "[breaker]\nfailure_threshold = 2\ntimeout_ms = 600000\n",
    )
    .expect("config");

    assert_eq!(
        flowstate(temp.path(), &["heal", "check"]).status.code(),
        Some(exit_codes::OK)
    );
    for _ in 0..2 {
        flowstate(temp.path(), &["heal", "failure"]);
    }
    let output = flowstate(temp.path(), &["heal", "check"]);
    assert_eq!(output.status.code(), Some(exit_codes::BREAKER_OPEN));
    assert_eq!(json_of(&output)["decision"], "rejected");

    let status = json_of(&flowstate(temp.path(), &["heal", "status"]));
    assert_eq!(status["state"], "OPEN");
    assert_eq!(status["failureCount"], 2);

    let other = flowstate(temp.path(), &["heal", "check", "--name", "lint"]);
    assert_eq!(other.status.code(), Some(exit_codes::OK));
}

#[test]
fn index_meta_merges_and_check_passes() {
    let temp = tempfile::tempdir().expect("tempdir");
    init(temp.path());
    flowstate(temp.path(), &["index", "meta", "--goal", "ship login"]);
    let meta = json_of(&flowstate(
        temp.path(),
        &["index", "meta", "--language-config", r#"{"test":"cargo test"}"#],
    ));
    assert_eq!(meta["projectGoal"], "ship login");
    assert_eq!(meta["languageConfig"]["test"], "cargo test");

    create(temp.path(), "m.one", "0", &[]);
    let output = flowstate(temp.path(), &["index", "check"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(json_of(&output)["ok"], true);
}
