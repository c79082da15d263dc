//! Smoke tests for the `chainback` binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use rusqlite::Connection;
use tempfile::TempDir;

fn chainback(base: &Path) -> Command {
    let mut cmd = Command::cargo_bin("chainback").unwrap();
    cmd.env("CHAINBACK_DATA_DIR", base).env_remove("RUST_LOG");
    cmd
}

fn seed_database(base: &Path) {
    let data = base.join("data");
    fs::create_dir_all(data.join("attachments")).unwrap();
    let conn = Connection::open(data.join("app.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE entries (id INTEGER PRIMARY KEY, note TEXT);
         INSERT INTO entries (note) VALUES ('hello');",
    )
    .unwrap();
    fs::write(data.join("attachments").join("scan.png"), "png").unwrap();
}

fn created_id(stdout: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Backup created: "))
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap()
        .to_string()
}

#[test]
fn status_on_empty_installation() {
    let temp = TempDir::new().unwrap();
    chainback(temp.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Latest backup:   none"));
}

#[test]
fn create_list_and_protect() {
    let temp = TempDir::new().unwrap();
    seed_database(temp.path());

    let output = chainback(temp.path()).arg("create").output().unwrap();
    assert!(output.status.success());
    let id = created_id(&output.stdout);
    assert!(id.starts_with("bk-"));

    chainback(temp.path())
        .arg("create")
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes since the last backup."));

    chainback(temp.path())
        .args(["list", "--verbose"])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()).and(predicate::str::contains("[protected]")));

    chainback(temp.path())
        .args(["delete", id.as_str(), "--force"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("protected"));
}

#[test]
fn restore_stage_and_cancel() {
    let temp = TempDir::new().unwrap();
    seed_database(temp.path());

    let output = chainback(temp.path()).args(["create", "--full"]).output().unwrap();
    let id = created_id(&output.stdout);

    chainback(temp.path())
        .args(["restore", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Restore staged"));
    assert!(temp.path().join("pending_restore.json").exists());

    chainback(temp.path())
        .arg("create")
        .assert()
        .success()
        .stdout(predicate::str::contains("restore is pending"));

    chainback(temp.path())
        .arg("cancel")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending restore cancelled."));
    assert!(!temp.path().join("pending_restore.json").exists());
}

#[test]
fn unknown_backup_id_fails() {
    let temp = TempDir::new().unwrap();
    chainback(temp.path())
        .args(["restore", "bk-00000000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn trigger_and_config() {
    let temp = TempDir::new().unwrap();
    seed_database(temp.path());

    chainback(temp.path())
        .args(["trigger", "session-timeout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup created"));

    chainback(temp.path())
        .args(["trigger", "logout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No backup needed for logout."));

    chainback(temp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Frequency:          daily"));
}
