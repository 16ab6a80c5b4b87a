use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde_json::Value;
use tempfile::tempdir;

fn write_params(path: &Path, json: &str) {
    fs::write(path, json).expect("params should write");
}

fn run_qcr(cwd: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_qcr"))
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("qcr command should run")
}

fn repo_fonts_dir() -> Option<PathBuf> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/fonts");
    dir.join("regular.ttf").is_file().then_some(dir)
}

#[test]
fn check_rejects_malformed_json_with_validation_code() {
    let dir = tempdir().expect("tempdir should create");
    let path = dir.path().join("params.json");
    write_params(&path, "{not json");

    let output = run_qcr(dir.path(), &["check", "params.json"]);
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(3), "validation errors exit 3");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("qcr check:"), "stderr: {stderr}");
    assert!(stderr.contains("params_invalid"), "stderr: {stderr}");
}

#[test]
fn check_requires_at_least_one_message() {
    let dir = tempdir().expect("tempdir should create");
    let path = dir.path().join("params.json");
    write_params(&path, r#"{"messages": []}"#);

    let output = run_qcr(dir.path(), &["check", "params.json"]);
    assert_eq!(output.status.code(), Some(2), "usage errors exit 2");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("messages_empty"), "stderr: {stderr}");
}

#[test]
fn check_summarizes_a_valid_request() {
    let dir = tempdir().expect("tempdir should create");
    let path = dir.path().join("params.json");
    write_params(
        &path,
        r#"{
            "backgroundColor": "//#292232",
            "messages": [
                {"from": {"id": 1, "name": "Ada"}, "text": "hello"},
                {"from": {"id": 2, "name": "Grace"}, "text": "hi", "media": {"url": "https://example.invalid/a.png"}}
            ]
        }"#,
    );

    let output = run_qcr(dir.path(), &["check", "params.json"]);
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("OK: 2 message(s)"), "stdout: {stdout}");
    assert!(stdout.contains("media [photo]"), "stdout: {stdout}");
    assert!(stdout.contains("#372e44/#231d2b"), "stdout: {stdout}");
}

#[test]
fn check_reads_params_from_stdin() {
    let dir = tempdir().expect("tempdir should create");

    let mut child = Command::new(env!("CARGO_BIN_EXE_qcr"))
        .current_dir(dir.path())
        .args(["check", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("qcr should spawn");
    child
        .stdin
        .take()
        .expect("stdin handle")
        .write_all(br#"{"messages": [{"from": {"name": "Ada"}, "text": "hi"}]}"#)
        .expect("stdin should accept params");
    let output = child.wait_with_output().expect("qcr should finish");

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("OK: 1 message(s)"), "stdout: {stdout}");
}

#[test]
fn render_without_fonts_is_a_dependency_error() {
    // The tempdir working directory has no assets/fonts, so the service
    // cannot come up. That failure is itself part of the contract.
    let dir = tempdir().expect("tempdir should create");
    let path = dir.path().join("params.json");
    write_params(&path, r#"{"messages": [{"from": {"name": "Ada"}, "text": "hi"}]}"#);

    let output = run_qcr(dir.path(), &["render", "params.json"]);
    assert_eq!(output.status.code(), Some(4), "dependency errors exit 4");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fonts_unavailable"), "stderr: {stderr}");
}

#[test]
fn agent_mode_prints_an_error_envelope() {
    let dir = tempdir().expect("tempdir should create");
    let path = dir.path().join("params.json");
    write_params(&path, r#"{"messages": [{"from": {"name": "Ada"}, "text": "hi"}]}"#);

    let output = Command::new(env!("CARGO_BIN_EXE_qcr"))
        .current_dir(dir.path())
        .args(["render", "params.json"])
        .env("QCR_AGENT_MODE", "1")
        .output()
        .expect("qcr command should run");
    assert_eq!(output.status.code(), Some(4));

    let envelope: Value =
        serde_json::from_slice(&output.stderr).expect("stderr should be an error envelope");
    assert_eq!(envelope["ok"], Value::Bool(false));
    assert_eq!(envelope["error"]["code"], "fonts_unavailable");
    assert!(envelope["error"]["message"].is_string());
}

#[test]
fn doctor_fails_fast_without_ffmpeg_on_path() {
    let dir = tempdir().expect("tempdir should create");

    let output = Command::new(env!("CARGO_BIN_EXE_qcr"))
        .current_dir(dir.path())
        .arg("doctor")
        .env("PATH", "")
        .output()
        .expect("qcr command should run");
    assert_eq!(output.status.code(), Some(4), "missing dependency exits 4");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ffmpeg"), "stderr: {stderr}");
}

#[test]
fn render_rejects_unknown_methods() {
    let Some(fonts_dir) = repo_fonts_dir() else {
        return;
    };

    let dir = tempdir().expect("tempdir should create");
    fs::write(
        dir.path().join("qcr.yaml"),
        format!("fonts_dir: {}\n", fonts_dir.display()),
    )
    .expect("config should write");
    write_params(
        &dir.path().join("params.json"),
        r#"{"messages": [{"from": {"name": "Ada"}, "text": "hi"}]}"#,
    );

    let output = run_qcr(dir.path(), &["render", "params.json", "--method", "bogus"]);
    assert_eq!(
        output.status.code(),
        Some(2),
        "unknown method is a usage error"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("method_not_found"), "stderr: {stderr}");
}

#[test]
fn render_writes_binary_output_for_the_output_flag() {
    let Some(fonts_dir) = repo_fonts_dir() else {
        return;
    };

    let dir = tempdir().expect("tempdir should create");
    fs::write(
        dir.path().join("qcr.yaml"),
        format!("fonts_dir: {}\n", fonts_dir.display()),
    )
    .expect("config should write");
    write_params(
        &dir.path().join("params.json"),
        r#"{"messages": [{"from": {"id": 7, "name": "Ada"}, "text": "hello there"}]}"#,
    );

    let output = run_qcr(dir.path(), &["render", "params.json", "-o", "quote.png"]);
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Wrote quote.png"), "stdout: {stdout}");

    let bytes = fs::read(dir.path().join("quote.png")).expect("output file should exist");
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n", "png signature expected");
}

#[test]
fn render_prints_a_success_envelope_without_an_output_path() {
    let Some(fonts_dir) = repo_fonts_dir() else {
        return;
    };

    let dir = tempdir().expect("tempdir should create");
    fs::write(
        dir.path().join("qcr.yaml"),
        format!("fonts_dir: {}\n", fonts_dir.display()),
    )
    .expect("config should write");
    write_params(
        &dir.path().join("params.json"),
        r#"{"messages": [{"from": {"id": 7, "name": "Ada"}, "text": "hello there"}]}"#,
    );

    let output = run_qcr(dir.path(), &["render", "params.json"]);
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let envelope: Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be a success envelope");
    assert_eq!(envelope["ok"], Value::Bool(true));
    assert!(envelope["result"]["image"].is_string(), "base64 image payload");
    assert!(envelope["result"]["width"].as_u64().unwrap_or(0) > 0);
    assert_eq!(envelope["result"]["isAnimated"], Value::Bool(false));
}
