#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use predicates::str::contains;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// A one-connection Publisher that answers `reply` and hands back the line
/// it received.
fn fake_publisher(reply: &'static str) -> (String, mpsc::Receiver<serde_json::Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let mut stream = stream;
        stream.write_all(reply.as_bytes()).unwrap();
        let _ = tx.send(serde_json::from_str(&line).unwrap());
    });

    (addr, rx)
}

fn hsrequest(client_config: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("hsrequest").unwrap();
    cmd.arg("--client-config").arg(client_config);
    cmd
}

#[test]
fn help_lists_request_flags() {
    Command::cargo_bin("hsrequest")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("--begin"))
        .stdout(contains("--destination"))
        .stdout(contains("--extract"))
        .stdout(contains("delete"));
}

#[test]
fn missing_window_is_a_usage_error() {
    let temp = tempfile::tempdir().unwrap();
    hsrequest(&temp.path().join("client.toml"))
        .args(["-d", "/mnt/data/anon"])
        .assert()
        .failure()
        .stderr(contains("--begin"));
}

#[test]
fn accepted_request_exits_zero() {
    if !can_bind_localhost() {
        eprintln!("Skipping socket tests: cannot bind to localhost");
        return;
    }

    let (addr, received) = fake_publisher("DONE\0\n");
    let temp = tempfile::tempdir().unwrap();

    hsrequest(&temp.path().join("client.toml"))
        .args(["--publisher", &addr])
        .args(["-b", "2026-03-01 12:00:00", "-e", "2026-03-01 12:00:05"])
        .args(["-d", "pdaq@2ndbuild:/mnt/data/pdaqlocal/HsDataCopy"])
        .args(["-i", "req42", "-u", "alice", "--hubs", "1-3", "--extract"])
        .assert()
        .success()
        .stdout(contains("req42"));

    let body = received.recv().unwrap();
    assert_eq!(body["request_id"], "req42");
    assert_eq!(body["username"], "alice");
    assert_eq!(body["start_time"], "2026-03-01 12:00:00");
    assert_eq!(body["destination_dir"], "pdaq@2ndbuild:/mnt/data/pdaqlocal/HsDataCopy");
    assert_eq!(body["hubs"], "1-3");
    assert_eq!(body["extract"], true);
}

#[test]
fn rejected_request_exits_non_zero() {
    if !can_bind_localhost() {
        eprintln!("Skipping socket tests: cannot bind to localhost");
        return;
    }

    let (addr, _received) = fake_publisher("ERROR\0\n");
    let temp = tempfile::tempdir().unwrap();

    hsrequest(&temp.path().join("client.toml"))
        .args(["--publisher", &addr])
        .args(["-b", "157890067960246236", "-e", "157890017960246236"])
        .args(["-d", "/mnt/data/anon", "-i", "inverted"])
        .assert()
        .failure()
        .stderr(contains("rejected request inverted"));
}

#[test]
fn delete_sends_a_withdrawal() {
    if !can_bind_localhost() {
        eprintln!("Skipping socket tests: cannot bind to localhost");
        return;
    }

    let (addr, received) = fake_publisher("DONE\0\n");
    let temp = tempfile::tempdir().unwrap();

    hsrequest(&temp.path().join("client.toml"))
        .args(["delete", "req42", "-u", "alice", "--publisher", &addr])
        .assert()
        .success();

    let body = received.recv().unwrap();
    assert_eq!(body["msgtype"], "DELETE");
    assert_eq!(body["request_id"], "req42");
    assert_eq!(body["username"], "alice");
}

#[test]
fn publisher_from_client_config_is_used() {
    if !can_bind_localhost() {
        eprintln!("Skipping socket tests: cannot bind to localhost");
        return;
    }

    let (addr, received) = fake_publisher("DONE\0\n");
    let temp = tempfile::tempdir().unwrap();
    let config_path = temp.path().join("client.toml");
    std::fs::write(&config_path, format!("publisher = \"{addr}\"\n")).unwrap();

    hsrequest(&config_path)
        .args(["-b", "1000", "-e", "2000", "-d", "/mnt/data/anon"])
        .assert()
        .success();

    let body = received.recv().unwrap();
    assert_eq!(body["start_time"], 1000);
}
