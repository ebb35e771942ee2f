//! CLI tests for the `stagehand` binary.
//!
//! Spawns the binary and verifies exit codes and the JSON outcome for
//! passing, failing, and fatal runs.

use std::process::{Command, Output};

use serde_json::Value;
use stagehand::exit_codes;
use stagehand::test_support::TestRepo;

fn stagehand(dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stagehand"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run stagehand")
}

fn staged_repo(task: &str) -> TestRepo {
    let repo = TestRepo::with_commit(&[("a.js", "one\n")]).expect("repo");
    repo.write_config("", &format!("[tasks]\n\"*.js\" = \"{task}\"\n"))
        .expect("config");
    repo.write("a.js", "two\n").expect("write");
    repo.stage(&["a.js"]).expect("stage");
    repo
}

#[test]
fn passing_run_exits_ok_with_json_outcome() {
    let repo = staged_repo("true");
    let output = stagehand(repo.root(), &["--json", "--quiet"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let outcome: Value = serde_json::from_slice(&output.stdout).expect("json outcome");
    assert_eq!(outcome["status"], "success");
    assert_eq!(outcome["results"][0]["status"], "passed");
}

#[test]
fn failing_task_exits_failed() {
    let repo = staged_repo("false");
    let output = stagehand(repo.root(), &[]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&output.stderr).contains("*.js"));
}

#[test]
fn outside_a_repository_without_files_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = stagehand(temp.path(), &[]);

    assert_eq!(output.status.code(), Some(exit_codes::FATAL));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not inside a git repository"));
}

#[test]
fn explicit_files_run_without_a_repository() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        temp.path().join(".stagehand.toml"),
        "[tasks]\n\"*.js\" = { each = \"echo linted > {file}\" }\n",
    )
    .expect("config");
    std::fs::write(temp.path().join("a.js"), "raw\n").expect("write");
    std::fs::write(temp.path().join("b.md"), "raw\n").expect("write");

    let output = stagehand(temp.path(), &["--shell", "--files", "a.js", "b.md"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let read = |name: &str| std::fs::read_to_string(temp.path().join(name)).expect("read");
    assert_eq!(read("a.js"), "linted\n");
    assert_eq!(read("b.md"), "raw\n");
}

#[test]
fn stray_git_environment_is_ignored() {
    let repo = staged_repo("true");
    let output = Command::new(env!("CARGO_BIN_EXE_stagehand"))
        .current_dir(repo.root())
        .env("GIT_DIR", "/nonexistent/git-dir")
        .env("GIT_WORK_TREE", "/nonexistent/work-tree")
        .output()
        .expect("run stagehand");

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn invalid_config_is_fatal() {
    let repo = staged_repo("true");
    repo.write_config("", "[tasks]\n\"*.js\" = 42\n").expect("config");
    let output = stagehand(repo.root(), &[]);

    assert_eq!(output.status.code(), Some(exit_codes::FATAL));
    assert!(String::from_utf8_lossy(&output.stderr).contains("configuration error"));
}

#[test]
fn invalid_diff_filter_is_rejected() {
    let repo = staged_repo("true");
    let output = stagehand(repo.root(), &["--diff-filter", "xyz"]);
    assert_eq!(output.status.code(), Some(exit_codes::FATAL));
}
