//! Integration tests for the Opflow CLI
//!
//! These tests run the actual CLI binary and verify output.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get the binary to test
fn opflow_cmd() -> Command {
    let mut cmd = Command::cargo_bin("opflow").unwrap();
    cmd.env("RUST_LOG", "warn");
    cmd
}

/// Config file pointing storage into the temp dir
fn write_config(dir: &Path) -> PathBuf {
    let config = dir.join("config.toml");
    let data_dir = dir.join("workflows");
    let activity = dir.join("activity.ndjson");
    fs::write(
        &config,
        format!(
            "[storage]\ndata_dir = {:?}\nactivity_file = {:?}\n",
            data_dir.to_string_lossy(),
            activity.to_string_lossy()
        ),
    )
    .unwrap();
    config
}

fn write_workflow(dir: &Path, yaml: &str) -> PathBuf {
    let file = dir.join("workflow.yaml");
    fs::write(&file, yaml).unwrap();
    file
}

#[test]
fn test_help_flag() {
    opflow_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("workflow automation engine"))
        .stdout(predicate::str::contains("rehearse"));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validate_valid_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(temp_dir.path(), common::recon_workflow_yaml());

    opflow_cmd()
        .args(["validate", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("Steps: 3"))
        .stdout(predicate::str::contains("Step 2"));
}

#[test]
fn test_validate_rejects_bad_module_path() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(
        temp_dir.path(),
        r#"
name: Broken
steps:
  - type: post
    module: "../../etc/passwd"
"#,
    );

    opflow_cmd()
        .args(["validate", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPF-011"));
}

#[test]
fn test_validate_rejects_foreign_field() {
    let temp_dir = TempDir::new().unwrap();
    let file = write_workflow(
        temp_dir.path(),
        r#"
name: Mixed
steps:
  - type: delay
    delay_seconds: 3
    command: whoami
"#,
    );

    opflow_cmd()
        .args(["validate", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_validate_missing_file() {
    opflow_cmd()
        .args(["validate", "/nonexistent/workflow.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPF-093"));
}

// ============================================================================
// Templates
// ============================================================================

#[test]
fn test_templates_list() {
    opflow_cmd()
        .arg("templates")
        .assert()
        .success()
        .stdout(predicate::str::contains("windows_post_exploit"))
        .stdout(predicate::str::contains("credential_harvest"))
        .stdout(predicate::str::contains("(3 steps)"));
}

#[test]
fn test_templates_show_one() {
    opflow_cmd()
        .args(["templates", "persistence"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Establish Persistence"))
        .stdout(predicate::str::contains("windows/manage/schtasks"));
}

#[test]
fn test_templates_unknown() {
    opflow_cmd()
        .args(["templates", "ransomware"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPF-021"))
        .stderr(predicate::str::contains("Fix:"));
}

// ============================================================================
// Rehearsal against the mock provider
// ============================================================================

#[test]
fn test_rehearse_completes() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());
    let file = write_workflow(temp_dir.path(), common::recon_workflow_yaml());

    opflow_cmd()
        .args(["--config", config.to_str().unwrap()])
        .args(["rehearse", file.to_str().unwrap(), "--session", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[1/3] Get User ID"))
        .stdout(predicate::str::contains("Waited 0 seconds"))
        .stdout(predicate::str::contains("Workflow completed"));
}

#[test]
fn test_rehearse_failing_command() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());
    let file = write_workflow(temp_dir.path(), common::recon_workflow_yaml());

    opflow_cmd()
        .args(["--config", config.to_str().unwrap()])
        .args(["rehearse", file.to_str().unwrap(), "--session", "1"])
        .args(["--fail-command", "getuid"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("getuid failed (rehearsal)"))
        .stderr(predicate::str::contains("workflow failed at step 1"));
}

#[test]
fn test_rehearse_without_session_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());
    let file = write_workflow(temp_dir.path(), common::recon_workflow_yaml());

    opflow_cmd()
        .args(["--config", config.to_str().unwrap()])
        .args(["rehearse", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no target session specified"));
}

// ============================================================================
// Stored workflows
// ============================================================================

#[test]
fn test_list_and_show_after_rehearsal() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());
    let file = write_workflow(temp_dir.path(), common::recon_workflow_yaml());
    let config_arg = config.to_str().unwrap();

    opflow_cmd()
        .args(["--config", config_arg, "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No workflows"));

    opflow_cmd()
        .args(["--config", config_arg])
        .args(["rehearse", file.to_str().unwrap(), "--session", "2"])
        .assert()
        .success();

    let stored: Vec<_> = fs::read_dir(temp_dir.path().join("workflows"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(stored.len(), 1);
    let id = stored[0].file_stem().unwrap().to_str().unwrap().to_string();

    opflow_cmd()
        .args(["--config", config_arg, "list", "--status", "completed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Quick recon"));

    opflow_cmd()
        .args(["--config", config_arg, "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"completed\""))
        .stdout(predicate::str::contains("Get User ID"));

    opflow_cmd()
        .args(["--config", config_arg, "activity", "--workflow", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Quick recon"));
}

#[test]
fn test_read_only_commands_leave_running_documents_alone() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());
    let config_arg = config.to_str().unwrap();
    let workflows = temp_dir.path().join("workflows");
    fs::create_dir_all(&workflows).unwrap();

    let mut doc = opflow::Workflow::from_spec(
        opflow::WorkflowSpec::from_yaml(common::recon_workflow_yaml()).unwrap(),
    )
    .unwrap();
    doc.status = opflow::WorkflowStatus::Running;
    let path = workflows.join(format!("{}.json", doc.id));
    fs::write(&path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();

    for args in [vec!["list"], vec!["show", doc.id.as_str()], vec!["activity"]] {
        opflow_cmd()
            .args(["--config", config_arg])
            .args(&args)
            .assert()
            .success();
    }
    let stored: opflow::Workflow = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(stored.status, opflow::WorkflowStatus::Running);

    opflow_cmd()
        .args(["--config", config_arg, "recover"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Parked 1 interrupted run(s)"));
    let stored: opflow::Workflow = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(stored.status, opflow::WorkflowStatus::Paused);
}

#[test]
fn test_show_unknown_workflow() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path());

    opflow_cmd()
        .args(["--config", config.to_str().unwrap(), "show", "missing-id"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("OPF-020"));
}

#[test]
fn test_list_rejects_unknown_status() {
    opflow_cmd()
        .args(["list", "--status", "exploding"])
        .assert()
        .failure();
}
