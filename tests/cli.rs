//! End-to-end tests against the compiled binary.

mod common;

use std::path::Path;
use std::process::{Command, Output};

use common::TestRepo;

fn ticketflow(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ticketflow"))
        .args(args)
        .current_dir(dir)
        .env("TICKETFLOW_NON_INTERACTIVE", "true")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_CONFIG_SYSTEM", "/dev/null")
        .output()
        .expect("spawn ticketflow")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({e}): {}",
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn test_close_without_active_ticket_emits_json_error() {
    let repo = TestRepo::new();
    repo.init_project(&TestRepo::config(true));

    let output = ticketflow(repo.root(), &["close", "--format", "json"]);

    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(1));
    // stdout stays empty; the error is a single JSON document on stderr
    assert!(output.stdout.is_empty(), "stdout: {:?}", output.stdout);
    let err: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap_or_else(|e| {
        panic!(
            "stderr is not JSON ({e}): {}",
            String::from_utf8_lossy(&output.stderr)
        )
    });
    assert_eq!(err["error"]["code"], "TICKET_NOT_STARTED");
}

#[test]
fn test_text_error_shape_and_suggestions() {
    let repo = TestRepo::new();
    repo.init_project(&TestRepo::config(true));

    let output = ticketflow(repo.root(), &["close"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error: no ticket is currently active"));
    assert!(stderr.contains("Suggestions:"));
}

#[test]
fn test_init_scaffolds_and_is_idempotent() {
    let repo = TestRepo::new();

    let output = ticketflow(repo.root(), &["init"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(repo.root().join(".ticketflow.yaml").exists());
    for sub in ["todo", "doing", "done"] {
        assert!(repo.root().join("tickets").join(sub).is_dir());
    }
    let gitignore = std::fs::read_to_string(repo.root().join(".gitignore")).unwrap();
    assert!(gitignore.contains("current-ticket.md"));

    // a second init succeeds without clobbering
    let output = ticketflow(repo.root(), &["init"]);
    assert!(output.status.success());
}

#[test]
fn test_branch_mode_flow_new_start_close() {
    let repo = TestRepo::new();
    repo.init_project(&TestRepo::config(false));

    let output = ticketflow(repo.root(), &["new", "add-logging", "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let id = stdout_json(&output)["ticket_id"]
        .as_str()
        .expect("ticket_id")
        .to_string();
    assert!(id.ends_with("-add-logging"));
    assert!(repo.root().join(format!("tickets/todo/{id}.md")).exists());

    let output = ticketflow(repo.root(), &["start", &id, "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let started = stdout_json(&output);
    assert_eq!(started["status"], "doing");
    assert!(started["worktree_path"].is_null());
    assert_eq!(repo.current_branch(), id);
    assert_eq!(repo.head_subject(), format!("Start ticket: {id}"));
    assert!(repo
        .root()
        .join("current-ticket.md")
        .symlink_metadata()
        .is_ok());

    let output = ticketflow(repo.root(), &["close", "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let closed = stdout_json(&output);
    assert_eq!(closed["status"], "done");
    assert!(closed["duration"].is_string());
    assert!(repo.root().join(format!("tickets/done/{id}.md")).exists());
}

#[test]
fn test_list_and_status_json() {
    let repo = TestRepo::new();
    repo.init_project(&TestRepo::config(false));

    assert!(ticketflow(repo.root(), &["new", "first"]).status.success());
    assert!(ticketflow(repo.root(), &["new", "second"]).status.success());

    let output = ticketflow(repo.root(), &["list", "--status", "all", "--format", "json"]);
    assert!(output.status.success());
    let listed = stdout_json(&output);
    assert_eq!(listed["tickets"].as_array().unwrap().len(), 2);

    let output = ticketflow(repo.root(), &["status", "--format", "json"]);
    assert!(output.status.success());
    let status = stdout_json(&output);
    assert!(status["current_ticket"].is_null());
    assert_eq!(status["tickets"]["todo"], 2);

    // --count caps the list
    let output = ticketflow(
        repo.root(),
        &["list", "--status", "all", "--count", "1", "--format", "json"],
    );
    assert_eq!(stdout_json(&output)["tickets"].as_array().unwrap().len(), 1);
}

#[test]
fn test_env_var_selects_json_output() {
    let repo = TestRepo::new();
    repo.init_project(&TestRepo::config(false));

    let output = Command::new(env!("CARGO_BIN_EXE_ticketflow"))
        .args(["status"])
        .current_dir(repo.root())
        .env("TICKETFLOW_OUTPUT_FORMAT", "json")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_CONFIG_SYSTEM", "/dev/null")
        .output()
        .expect("spawn ticketflow");
    assert!(output.status.success());
    let status = stdout_json(&output);
    assert!(status.get("tickets").is_some());
}

#[test]
fn test_restore_repairs_missing_link() {
    let repo = TestRepo::new();
    repo.init_project(&TestRepo::config(false));

    let output = ticketflow(repo.root(), &["new", "fixable", "--format", "json"]);
    let id = stdout_json(&output)["ticket_id"].as_str().unwrap().to_string();
    assert!(ticketflow(repo.root(), &["start", &id]).status.success());

    let link = repo.root().join("current-ticket.md");
    std::fs::remove_file(&link).unwrap();

    let output = ticketflow(repo.root(), &["restore", "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout_json(&output)["ticket_id"], id.as_str());
    assert!(link.symlink_metadata().is_ok());
    assert_eq!(
        std::fs::read_link(&link).unwrap(),
        std::path::PathBuf::from(format!("tickets/doing/{id}.md"))
    );
}

#[test]
fn test_show_renders_ticket() {
    let repo = TestRepo::new();
    repo.init_project(&TestRepo::config(false));

    let output = ticketflow(repo.root(), &["new", "showable", "--format", "json"]);
    let id = stdout_json(&output)["ticket_id"].as_str().unwrap().to_string();

    let output = ticketflow(repo.root(), &["show", &id]);
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains(&format!("ID: {id}")));
    assert!(text.contains("Status: todo"));

    let output = ticketflow(repo.root(), &["show", "240101-000000-missing"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_usage_error_exits_2() {
    let repo = TestRepo::new();
    repo.init_project(&TestRepo::config(false));
    let output = ticketflow(repo.root(), &["list", "--status", "bogus"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_outside_git_repo_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let output = ticketflow(dir.path(), &["list", "--format", "json"]);
    assert_eq!(output.status.code(), Some(1));
    let err: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["error"]["code"], "NOT_GIT_REPO");
}

#[test]
fn test_invalid_slug_is_a_validation_error() {
    let repo = TestRepo::new();
    repo.init_project(&TestRepo::config(false));
    let output = ticketflow(repo.root(), &["new", "Bad Slug", "--format", "json"]);
    assert_eq!(output.status.code(), Some(1));
    let err: serde_json::Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["error"]["code"], "VALIDATION");
}

#[test]
fn test_auto_cleanup_dry_run_via_cli() {
    let repo = TestRepo::new();
    repo.init_project(&TestRepo::config(false));

    let output = ticketflow(repo.root(), &["auto-cleanup", "--dry-run", "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = stdout_json(&output);
    assert_eq!(report["orphaned_worktrees"], 0);
    assert_eq!(report["stale_branches"], 0);
    assert_eq!(report["dry_run"], true);
}
