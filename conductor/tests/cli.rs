//! CLI tests for `conductor init`, `run` and `experiment`.
//!
//! Spawns the binary and checks exit codes and the files it leaves behind.

use std::fs;
use std::process::Command;

use conductor::exit_codes;
use conductor::io::init::WorkspacePaths;
use conductor::io::jobs::JobRecord;

fn conductor() -> Command {
    Command::new(env!("CARGO_BIN_EXE_conductor"))
}

#[test]
fn init_creates_workspace_and_refuses_overwrite() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = conductor()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("conductor init");
    assert_eq!(status.code(), Some(exit_codes::OK));
    let paths = WorkspacePaths::new(temp.path().join(".orchestrator"));
    assert!(paths.config_path.is_file());
    assert!(paths.goals_path.is_file());
    assert!(paths.tasks_path.is_file());

    let again = conductor()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("conductor init again");
    assert_eq!(again.code(), Some(exit_codes::SETUP_ERROR));
}

#[test]
fn run_without_workspace_is_a_setup_error() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = conductor()
        .current_dir(temp.path())
        .args(["run", "--max-steps", "1"])
        .output()
        .expect("conductor run");

    assert_eq!(output.status.code(), Some(exit_codes::SETUP_ERROR));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("workspace not found"), "stderr: {stderr}");
}

#[test]
fn run_with_malformed_goal_file_is_a_setup_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let init = conductor()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("conductor init");
    assert_eq!(init.code(), Some(exit_codes::OK));
    let paths = WorkspacePaths::new(temp.path().join(".orchestrator"));
    fs::write(&paths.goals_path, "{ not json").expect("corrupt goals");

    let status = conductor()
        .current_dir(temp.path())
        .args(["run", "--max-steps", "1"])
        .status()
        .expect("conductor run");

    assert_eq!(status.code(), Some(exit_codes::SETUP_ERROR));
}

#[test]
fn experiment_enqueues_job() {
    let temp = tempfile::tempdir().expect("tempdir");
    let init = conductor()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("conductor init");
    assert_eq!(init.code(), Some(exit_codes::OK));

    let output = conductor()
        .current_dir(temp.path())
        .args([
            "experiment",
            "--command",
            "echo hi",
            "--task-id",
            "task-1",
            "--run-name",
            "smoke",
        ])
        .output()
        .expect("conductor experiment");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let job_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    assert!(job_id.starts_with("job-"), "stdout: {job_id}");
    let paths = WorkspacePaths::new(temp.path().join(".orchestrator"));
    let queued = paths.jobs_dir.join("queue").join(format!("{job_id}.json"));
    let record: JobRecord =
        serde_json::from_str(&fs::read_to_string(queued).expect("read job")).expect("parse job");
    assert_eq!(record.command, "echo hi");
    assert_eq!(record.task_id.as_deref(), Some("task-1"));
    assert_eq!(record.run_name, "smoke");
}

#[test]
fn jobs_lists_nothing_for_fresh_workspace() {
    let temp = tempfile::tempdir().expect("tempdir");
    let init = conductor()
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("conductor init");
    assert_eq!(init.code(), Some(exit_codes::OK));

    let output = conductor()
        .current_dir(temp.path())
        .arg("jobs")
        .output()
        .expect("conductor jobs");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(output.stdout.is_empty());
}
