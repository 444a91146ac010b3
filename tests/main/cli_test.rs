//! CLI surface smoke tests.

use assert_cmd::Command;

#[test]
fn help_lists_the_subcommands() {
    let mut cmd = Command::cargo_bin("cadence").expect("binary");
    let assert = cmd.arg("--help").assert().success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for subcommand in ["start", "migrate", "ingest", "learn"] {
        assert!(output.contains(subcommand), "help should list {subcommand}");
    }
}

#[test]
fn unknown_subcommands_fail() {
    let mut cmd = Command::cargo_bin("cadence").expect("binary");
    cmd.arg("does-not-exist").assert().failure();
}

#[test]
fn migrate_bootstraps_a_fresh_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("cadence.db");
    let mut cmd = Command::cargo_bin("cadence").expect("binary");
    cmd.env("CADENCE_DB_PATH", db.to_str().expect("utf8"))
        .env("CADENCE_CONFIG_PATH", dir.path().join("missing.toml"))
        .arg("migrate")
        .assert()
        .success();
    assert!(db.exists());
}
