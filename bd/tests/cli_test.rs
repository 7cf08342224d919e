//! CLI smoke tests for the `bd` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// `bd` with home and XDG directories pointed into a temp dir
fn bd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("bd").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_RUNTIME_DIR", home.path().join("run"))
        .env_remove("BOT_TOKEN");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();
    bd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("broadcasts"))
        .stdout(predicate::str::contains("segments"))
        .stdout(predicate::str::contains("run-daemon").not());
}

#[test]
fn test_status_when_stopped() {
    let home = TempDir::new().unwrap();
    bd(&home)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped"))
        .stdout(predicate::str::contains("No store found"));
}

#[test]
fn test_status_json() {
    let home = TempDir::new().unwrap();
    let output = bd(&home).args(["status", "--format", "json"]).output().unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["daemon"]["running"], false);
    assert!(json["store"].is_null());
}

#[test]
fn test_broadcasts_without_store() {
    let home = TempDir::new().unwrap();
    bd(&home)
        .arg("broadcasts")
        .assert()
        .success()
        .stdout(predicate::str::contains("No store found"));
}

#[test]
fn test_stop_when_not_running() {
    let home = TempDir::new().unwrap();
    bd(&home)
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}

#[test]
fn test_foreground_start_requires_token() {
    let home = TempDir::new().unwrap();
    bd(&home)
        .args(["start", "--foreground"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("BOT_TOKEN"));
}

#[test]
fn test_bad_config_path_fails() {
    let home = TempDir::new().unwrap();
    bd(&home)
        .args(["--config", "missing.yml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
