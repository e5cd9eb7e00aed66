//! End-to-end tests for the sync-cli binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn cli(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sync-cli").unwrap();
    cmd.current_dir(dir).env("RUST_LOG", "warn");
    cmd
}

fn write_migration(dir: &Path, name: &str, contents: &str) {
    let migrations = dir.join("migrations");
    std::fs::create_dir_all(&migrations).unwrap();
    std::fs::write(migrations.join(name), contents).unwrap();
}

#[test]
fn create_up_status_down() {
    let dir = tempfile::tempdir().unwrap();

    cli(dir.path())
        .args(["create", "Create Projects"])
        .assert()
        .success()
        .stdout(predicate::str::contains("001_create_projects.sql"));
    write_migration(
        dir.path(),
        "001_create_projects.sql",
        "-- Up\nCREATE TABLE projects (id TEXT PRIMARY KEY);\n-- Down\nDROP TABLE projects;\n",
    );

    cli(dir.path())
        .arg("up")
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 001_create_projects"));
    assert!(dir.path().join("strata.db").exists());

    cli(dir.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""current": "001_create_projects""#));

    cli(dir.path())
        .arg("down")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled back 001_create_projects"));

    cli(dir.path())
        .arg("down")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no applied migrations"));
}

#[test]
fn dry_run_prints_plan() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(
        dir.path(),
        "001_tags.sql",
        "-- Up\nCREATE TABLE tags (id TEXT);\n-- Down\nDROP TABLE tags;\n",
    );

    cli(dir.path())
        .args(["up", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-- 001_tags"))
        .stdout(predicate::str::contains("CREATE TABLE tags"));

    cli(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending (1)"));
}

#[test]
fn invalid_migration_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    write_migration(dir.path(), "001_broken.sql", "-- Up\nCREATE TABLE t (id TEXT;\n");

    cli(dir.path())
        .args(["validate", "001_broken"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("001_broken is not valid"));
}

#[test]
fn config_file_sets_paths() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("custom.toml"),
        "[database]\npath = \"data/app.db\"\n\n[migrations]\ndirectory = \"schema\"\n",
    )
    .unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::create_dir_all(dir.path().join("schema")).unwrap();
    std::fs::write(
        dir.path().join("schema").join("001_init.sql"),
        "-- Up\nCREATE TABLE a (id TEXT);\n",
    )
    .unwrap();

    cli(dir.path())
        .args(["--config", "custom.toml", "up"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 001_init"));
    assert!(dir.path().join("data").join("app.db").exists());
}

#[test]
fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();

    cli(dir.path())
        .args(["--config", "nope.toml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn unlock_reports_state() {
    let dir = tempfile::tempdir().unwrap();

    cli(dir.path())
        .arg("unlock")
        .assert()
        .success()
        .stdout(predicate::str::contains("was not held"));
}
