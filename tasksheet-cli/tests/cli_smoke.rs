use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use tasksheet_core::config;
use tasksheet_sync::StagingQueue;

fn tasksheet_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tasksheet"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove(config::ENV_ACCESS_TOKEN)
        .env_remove(config::ENV_SPREADSHEET_ID);
    cmd
}

#[test]
fn init_writes_config_once() {
    let home = TempDir::new().expect("home");

    tasksheet_cmd(home.path())
        .args(["init", "--spreadsheet-id", "abc123", "-w", "Board"])
        .assert()
        .success()
        .stdout(contains("Wrote default config"));

    let loaded = config::load_at(home.path()).expect("load config");
    assert_eq!(loaded.spreadsheet_id, "abc123");
    assert_eq!(loaded.worksheet, "Board");

    tasksheet_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Config already present"));
}

#[test]
fn enqueue_then_queue_lists_entry() {
    let home = TempDir::new().expect("home");

    tasksheet_cmd(home.path())
        .args([
            "enqueue",
            "PROJ-7",
            "--local",
            "--payload",
            r#"{"summary":"Fix login","status":"Open"}"#,
        ])
        .assert()
        .success()
        .stdout(contains("queued locally (queue depth 1)"));

    tasksheet_cmd(home.path())
        .arg("queue")
        .assert()
        .success()
        .stdout(contains("PROJ-7").and(contains("Fix login")).and(contains("Open")));

    let pending = StagingQueue::at(home.path()).pending().expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload["key"], "PROJ-7");
}

#[test]
fn enqueue_without_daemon_falls_back_to_local_queue() {
    let home = TempDir::new().expect("home");

    tasksheet_cmd(home.path())
        .args(["enqueue", "PROJ-8", "--payload", r#"{"summary":"x"}"#])
        .assert()
        .success()
        .stdout(contains("queued locally"));

    assert_eq!(StagingQueue::at(home.path()).len().expect("len"), 1);
}

#[test]
fn enqueue_reads_payload_file() {
    let home = TempDir::new().expect("home");
    let payload = home.path().join("task.json");
    fs::write(&payload, r#"{"summary":"From file"}"#).expect("write payload");

    tasksheet_cmd(home.path())
        .args(["enqueue", "PROJ-9", "--local", "--file"])
        .arg(&payload)
        .assert()
        .success();

    tasksheet_cmd(home.path())
        .args(["queue", "--json"])
        .assert()
        .success()
        .stdout(contains("From file"));
}

#[test]
fn enqueue_rejects_non_object_payload() {
    let home = TempDir::new().expect("home");

    tasksheet_cmd(home.path())
        .args(["enqueue", "PROJ-1", "--local", "--payload", "[1, 2]"])
        .assert()
        .failure()
        .stderr(contains("payload must be a JSON object"));

    tasksheet_cmd(home.path())
        .args(["enqueue", "PROJ-1", "--local", "--payload", "{not json"])
        .assert()
        .failure()
        .stderr(contains("payload is not valid JSON"));

    assert!(StagingQueue::at(home.path()).is_empty().expect("is_empty"));
}

#[test]
fn enqueue_rejects_blank_key() {
    let home = TempDir::new().expect("home");

    tasksheet_cmd(home.path())
        .args(["enqueue", "   ", "--local"])
        .assert()
        .failure();
}

#[test]
fn empty_queue_prints_message() {
    let home = TempDir::new().expect("home");

    tasksheet_cmd(home.path())
        .arg("queue")
        .assert()
        .success()
        .stdout(contains("Queue is empty."));
}

#[test]
fn local_sync_without_config_fails() {
    let home = TempDir::new().expect("home");

    tasksheet_cmd(home.path())
        .args(["sync", "--local"])
        .assert()
        .failure()
        .stderr(contains("failed to load config"));
}

#[test]
fn local_sync_with_empty_queue_makes_no_requests() {
    let home = TempDir::new().expect("home");

    tasksheet_cmd(home.path())
        .args(["init", "--spreadsheet-id", "abc123"])
        .assert()
        .success();

    tasksheet_cmd(home.path())
        .args(["sync", "--local"])
        .env(config::ENV_ACCESS_TOKEN, "token")
        .assert()
        .success()
        .stdout(contains("queue empty"));
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");

    tasksheet_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": false"));

    tasksheet_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}
