//! End-to-end tests for the `bb` binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn bb(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("bb").unwrap();
    cmd.arg("--feed").arg(temp.path().join("feed.jsonl"));
    cmd
}

#[test]
fn test_post_list_ack() {
    let temp = TempDir::new().unwrap();

    bb(&temp)
        .args(["post", "instruction", r#"{"_id": "first", "command": "Ping"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("first").and(predicate::str::contains("seq 1")));

    bb(&temp)
        .args(["post", "instruction", r#"{"_id": "second"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("seq 2"));

    bb(&temp)
        .args(["list", "instruction"])
        .assert()
        .success()
        .stdout(predicate::str::contains("first").and(predicate::str::contains("second")));

    bb(&temp)
        .args(["ack", "instruction"])
        .assert()
        .success()
        .stdout(predicate::str::contains("first"));

    bb(&temp)
        .args(["list", "instruction"])
        .assert()
        .success()
        .stdout(predicate::str::contains("second").and(predicate::str::contains("first").not()));
}

#[test]
fn test_ack_by_id_skips_older_documents() {
    let temp = TempDir::new().unwrap();
    bb(&temp).args(["post", "instruction", r#"{"_id": "older"}"#]).assert().success();
    bb(&temp).args(["post", "instruction", r#"{"_id": "newer"}"#]).assert().success();

    bb(&temp)
        .args(["ack", "instruction", "--id", "newer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("newer"));

    bb(&temp)
        .args(["list", "instruction"])
        .assert()
        .success()
        .stdout(predicate::str::contains("older").and(predicate::str::contains("newer").not()));

    bb(&temp)
        .args(["ack", "instruction", "--id", "newer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No document newer in instruction"));
}

#[test]
fn test_ack_on_empty_collection() {
    let temp = TempDir::new().unwrap();
    bb(&temp)
        .args(["ack", "instruction"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No documents in instruction"));
}

#[test]
fn test_post_rejects_invalid_json() {
    let temp = TempDir::new().unwrap();
    bb(&temp).args(["post", "instruction", "{not json"]).assert().failure();
}
