//! Drives the real binary with responses routed to descriptor 3.
#![cfg(unix)]

use action_launcher::{setup::SETUP_STARTED, test_utils::response_lines};
use serde_json::{Value, json};
use std::{
    io::Write,
    process::{Command, Output, Stdio},
};
use tempfile::TempDir;

/// Runs the launcher with fd 3 pointing at our stdout pipe and feeds `input`.
fn launch(args: &[&str], input: &str) -> Output {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(r#"exec "$0" "$@" 3>&1 1>&2"#)
        .arg(env!("CARGO_BIN_EXE_action_launcher"))
        .args(args)
        .env_remove("__OW_WAIT_FOR_ACK")
        .env_remove("__OW_CODE_HASH")
        .env_remove("ACTION_LAUNCHER_HANDLER")
        .env_remove("ACTION_LAUNCHER_MANIFEST")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn launcher");

    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.as_bytes())
        .expect("write requests");
    child.wait_with_output().expect("launcher output")
}

fn responses(output: &Output) -> Vec<Value> {
    response_lines(&output.stdout)
}

#[test]
fn test_ack_then_one_response_per_request() {
    let output = launch(
        &["--handler", "hello", "--wait-for-ack"],
        "{\"value\": {\"name\": \"Ada\"}}\n{\"value\": {}}\n",
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        responses(&output),
        vec![
            json!({"ok": true}),
            json!({"body": "Hello, Ada."}),
            json!({"body": "Hello, world."}),
        ]
    );
}

#[test]
fn test_diagnostics_stay_off_the_response_channel() {
    let output = launch(&["--handler", "hello", "--debug"], "{\"value\": {}}\n");

    assert!(output.status.success());
    assert_eq!(responses(&output), vec![json!({"body": "Hello, world."})]);
    assert!(!output.stderr.is_empty());
}

#[test]
fn test_malformed_line_is_fatal() {
    let output = launch(&["--handler", "hello"], "{\"value\": {}}\nnot json\n{\"value\": {}}\n");

    assert!(!output.status.success());
    assert_eq!(responses(&output), vec![json!({"body": "Hello, world."})]);
}

#[test]
fn test_unknown_handler_fails_before_ack() {
    let output = launch(&["--handler", "sentiment", "--wait-for-ack"], "");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("sentiment"));
}

#[test]
fn test_setup_record_reused_across_processes() {
    let scratch = TempDir::new().unwrap();
    let args = [
        "--handler",
        "hello-setup",
        "--setup-step-ms",
        "5",
        "--code-hash",
        "a1b2",
        "--scratch-dir",
        scratch.path().to_str().unwrap(),
    ];

    let first = launch(&args, "{\"value\": {\"count\": 2}}\n");
    assert!(first.status.success());
    assert_eq!(
        responses(&first),
        vec![json!({"body": {"count": 2, "setup_status": SETUP_STARTED}})]
    );
    assert!(scratch.path().join("a1b2_done").exists());

    let second = launch(&args, "{\"value\": {\"name\": \"Bo\"}}\n");
    assert!(second.status.success());
    assert_eq!(responses(&second), vec![json!({"body": "Hello, Bo."})]);
}
