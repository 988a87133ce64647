//! Integration tests for the `caller` CLI binary.
//!
//! Argument parsing, help output, completions, config handling and a few
//! queue commands against a mocked triage backend. No broker is needed.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `caller` binary with env isolation.
///
/// Clears every `CALLER_*` variable and points the platform directories
/// at `home` so tests never touch the user's real configuration.
fn caller_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("caller");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("CALLER_CONFIG")
        .env_remove("CALLER_BACKEND_URL")
        .env_remove("CALLER_TOKEN")
        .env_remove("CALLER_BROKER_HOST")
        .env_remove("CALLER_WS_PORT")
        .env_remove("CALLER_DOCTOR_ID")
        .env_remove("CALLER_OUTPUT")
        .env_remove("CALLER_TIMEOUT");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn write_config(dir: &Path, backend_url: &str) -> PathBuf {
    let path = dir.join("station.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[backend]
url = "{backend_url}"
timeout = 5

[broker]
host = "127.0.0.1"

[station]
org_id = 1
org_code = "ORG1"
org_name = "Riverside Clinic"
dept_id = 40
doctor_id = 7
doctor_name = "Dr. Lee"
"#
        ),
    )
    .unwrap();
    path
}

fn envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": 200, "message": "ok", "data": data }))
}

async fn mock_queue(server: &MockServer, rows: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/lime/api/triage/patient/line/list"))
        .respond_with(envelope(json!({
            "list": rows,
            "total": 2,
            "meta": { "wait_count": 2, "pass_count": 0, "end_count": 3, "call_count": 1 }
        })))
        .mount(server)
        .await;
}

async fn mock_active_visit(server: &MockServer, data: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/lime/api/triage/doctor/visitPat"))
        .respond_with(envelope(data))
        .mount(server)
        .await;
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = caller_cmd(home.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    let home = tempfile::tempdir().unwrap();
    caller_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("patient queue")
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("next"))
            .and(predicate::str::contains("resolve")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    caller_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("caller"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    let home = tempfile::tempdir().unwrap();
    caller_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    let home = tempfile::tempdir().unwrap();
    caller_cmd(home.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let home = tempfile::tempdir().unwrap();
    let output = caller_cmd(home.path()).arg("foobar").output().unwrap();
    assert!(!output.status.success());
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_queue_without_config_is_usage_error() {
    let home = tempfile::tempdir().unwrap();
    caller_cmd(home.path())
        .arg("queue")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("caller config init"));
}

#[test]
fn test_assign_requires_target() {
    let home = tempfile::tempdir().unwrap();
    caller_cmd(home.path())
        .args(["assign", "A100"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--to"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag() {
    let home = tempfile::tempdir().unwrap();
    let file = home.path().join("custom.toml");
    caller_cmd(home.path())
        .args(["config", "path", "--config"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_config_set_then_show() {
    let home = tempfile::tempdir().unwrap();
    let file = home.path().join("station.toml");

    for (key, value) in [
        ("backend.url", "https://triage.example.org"),
        ("backend.token", "s3cret"),
        ("broker.host", "mq.clinic.local"),
        ("station.doctor_id", "7"),
    ] {
        caller_cmd(home.path())
            .arg("--config")
            .arg(&file)
            .args(["config", "set", key, value])
            .assert()
            .success();
    }

    let output = caller_cmd(home.path())
        .arg("--config")
        .arg(&file)
        .args(["-o", "json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["broker"]["host"], "mq.clinic.local");
    assert_eq!(shown["station"]["doctor_id"], 7);
    assert_eq!(shown["backend"]["token"], "********");
}

#[test]
fn test_config_set_rejects_mistyped_value() {
    let home = tempfile::tempdir().unwrap();
    let file = home.path().join("station.toml");
    caller_cmd(home.path())
        .arg("--config")
        .arg(&file)
        .args(["config", "set", "timing.page_size", "lots"])
        .assert()
        .code(2);
    assert!(!file.exists());
}

// ── Queue commands against a mocked backend ─────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_queue_lists_appointments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/lime/api/triage/patient/line/list"))
        .and(header("authorization", "test-token"))
        .and(header("orgcode", "ORG1"))
        .and(body_partial_json(json!({
            "page_num": 1,
            "condition": { "doc_id": 7, "queue_type": 3, "pat_type": 0 }
        })))
        .respond_with(envelope(json!({
            "list": [
                { "appointment_id": "A100", "name": "Chen Wei", "queue_no": 12, "state": 0 },
                { "appointment_id": "A101", "name": "Ana Ruiz", "queue_no": 13, "state": 2 }
            ],
            "total": 2
        })))
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), &server.uri());

    caller_cmd(home.path())
        .env("CALLER_TOKEN", "test-token")
        .arg("--config")
        .arg(&config)
        .args(["-o", "plain", "queue"])
        .assert()
        .success()
        .stdout("A100\nA101\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queue_table_shows_patients() {
    let server = MockServer::start().await;
    mock_queue(
        &server,
        json!([{ "appointment_id": "A100", "name": "Chen Wei", "queue_no": 12, "state": 0 }]),
    )
    .await;

    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), &server.uri());

    caller_cmd(home.path())
        .env("CALLER_TOKEN", "test-token")
        .arg("--config")
        .arg(&config)
        .args(["queue", "--tab", "waiting"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chen Wei").and(predicate::str::contains("calling")))
        .stderr(predicate::str::contains("waiting 2"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_current_prints_active_visit() {
    let server = MockServer::start().await;
    mock_active_visit(
        &server,
        json!({ "appointment_id": "A100", "id": 5512, "name": "Chen Wei", "queue_no": "12" }),
    )
    .await;

    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), &server.uri());

    caller_cmd(home.path())
        .env("CALLER_TOKEN", "test-token")
        .arg("--config")
        .arg(&config)
        .args(["-o", "plain", "current"])
        .assert()
        .success()
        .stdout("A100\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_next_with_empty_queue() {
    let server = MockServer::start().await;
    mock_active_visit(&server, serde_json::Value::Null).await;
    mock_queue(&server, json!([])).await;

    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), &server.uri());

    caller_cmd(home.path())
        .env("CALLER_TOKEN", "test-token")
        .arg("--config")
        .arg(&config)
        .arg("next")
        .assert()
        .success()
        .stderr(predicate::str::contains("Nobody is waiting"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_next_with_active_visit_does_not_call() {
    let server = MockServer::start().await;
    mock_active_visit(
        &server,
        json!({ "appointment_id": "A100", "name": "Chen Wei", "queue_no": "12" }),
    )
    .await;
    mock_queue(
        &server,
        json!([{ "appointment_id": "A101", "name": "Ana Ruiz", "state": 2 }]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/lime/api/triage/doctor/qryUntreated"))
        .and(body_partial_json(json!({ "org_id": 1, "dept_id": 40 })))
        .respond_with(envelope(json!([
            { "id": 9, "nick_name": "Dr. Park", "room_name": "Room 2", "count": 3 }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/lime/api/triage/patient/call"))
        .respond_with(envelope(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), &server.uri());

    caller_cmd(home.path())
        .env("CALLER_TOKEN", "test-token")
        .arg("--config")
        .arg(&config)
        .args(["-o", "plain", "next"])
        .assert()
        .success()
        .stdout("9\n")
        .stderr(predicate::str::contains("#12 Chen Wei is still in consultation"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_pass_exits_with_refusal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/lime/api/triage/patient/pass"))
        .and(body_partial_json(json!({ "appointment_id": "A100", "doc_id": 7 })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "code": 500, "message": "patient already passed" })),
        )
        .mount(&server)
        .await;
    mock_queue(&server, json!([])).await;

    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), &server.uri());

    caller_cmd(home.path())
        .env("CALLER_TOKEN", "test-token")
        .arg("--config")
        .arg(&config)
        .args(["pass", "A100"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("patient already passed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_assign_to_self_is_refused_locally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/lime/api/triage/patient/move"))
        .respond_with(envelope(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), &server.uri());

    caller_cmd(home.path())
        .env("CALLER_TOKEN", "test-token")
        .arg("--config")
        .arg(&config)
        .args(["assign", "A100", "--to", "7"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("same doctor"));
}
