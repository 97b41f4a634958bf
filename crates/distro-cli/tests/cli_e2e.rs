use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn health_reports_ok_on_a_fresh_state_dir() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("distro")
        .unwrap()
        .arg("--state-dir")
        .arg(dir.path())
        .arg("health")
        .assert()
        .success()
        .stderr(predicate::str::contains("[info] ok"));
}

#[test]
fn list_on_a_fresh_state_dir_reports_zero_jobs() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("distro")
        .unwrap()
        .arg("--state-dir")
        .arg(dir.path())
        .arg("list")
        .assert()
        .success()
        .stderr(predicate::str::contains("0 of 0 jobs shown"));
}

#[test]
fn get_unknown_job_fails() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("distro")
        .unwrap()
        .arg("--state-dir")
        .arg(dir.path())
        .arg("get")
        .arg("nonexistent-job")
        .assert()
        .failure();
}
