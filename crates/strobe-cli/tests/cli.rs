use std::fs;

use assert_cmd::Command;

fn strobe() -> Command {
    Command::cargo_bin("strobe").unwrap()
}

#[test]
fn capture_then_dump_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.strb");

    strobe()
        .arg("capture")
        .arg(&path)
        .args(["--submissions", "2", "--stepping", "b"])
        .assert()
        .success();

    let assert = strobe().arg("dump").arg(&path).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("device id 0x12, stepping 1"));
    assert!(stdout.contains("batch"));
    assert!(stdout.contains("context"));
    assert!(stdout.contains("poll"));
}

#[test]
fn no_comments_makes_captures_comment_free() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.strb");

    strobe()
        .arg("capture")
        .arg(&path)
        .arg("--no-comments")
        .assert()
        .success();

    let assert = strobe().arg("dump").arg(&path).assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(!stdout.contains(";;"));
}

#[test]
fn capture_rejects_an_unknown_engine() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.strb");

    strobe()
        .arg("capture")
        .arg(&path)
        .args(["--engine", "zcs"])
        .assert()
        .failure();
}

#[test]
fn dump_rejects_a_non_capture_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.strb");
    fs::write(&path, b"not a capture at all").unwrap();

    strobe().arg("dump").arg(&path).assert().failure();
}
