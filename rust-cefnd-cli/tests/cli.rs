use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("cefctrl")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("route"))
        .stdout(predicate::str::contains("interest"));
}

#[test]
fn route_add_requires_next_hop() {
    Command::cargo_bin("cefctrl")
        .unwrap()
        .args(["route", "add", "/a", "udp"])
        .assert()
        .failure();
}

#[test]
fn status_without_daemon_fails() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("missing.ctrl");

    Command::cargo_bin("cefctrl")
        .unwrap()
        .arg("--socket")
        .arg(&socket)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot reach the daemon"));
}

#[test]
fn interest_without_daemon_fails() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("missing.sock");

    Command::cargo_bin("cefctrl")
        .unwrap()
        .args(["interest", "/a/b", "--timeout", "100", "--local-socket"])
        .arg(&socket)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot connect"));
}
