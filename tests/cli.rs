use serde_json::Value;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn home_path(home: &TempDir) -> &Path {
    home.path()
}

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_azure-costs")
}

fn run_cmd(home: &TempDir, args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .env("AZURE_COSTS_HOME", home_path(home))
        .env_remove("RUST_LOG")
        .output()
        .expect("run azure-costs command")
}

fn config_file(home: &TempDir) -> std::path::PathBuf {
    home.path().join("config").join("config.toml")
}

#[test]
fn init_creates_config_file() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["init"]);
    assert!(output.status.success());

    let raw = fs::read_to_string(config_file(&home)).expect("config written");
    assert!(raw.contains("log_level"));
    assert!(raw.contains("[endpoints]"));
    assert!(raw.contains("[datasource]"));
}

#[test]
fn init_is_idempotent() {
    let home = TempDir::new().expect("temp home");

    assert!(run_cmd(&home, &["init"]).status.success());
    let first = fs::read_to_string(config_file(&home)).expect("read config after first init");

    assert!(run_cmd(&home, &["init"]).status.success());
    let second = fs::read_to_string(config_file(&home)).expect("read config after second init");

    assert_eq!(first, second);
}

#[test]
fn health_reports_ok_for_valid_settings() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(
        &home,
        &[
            "health",
            "--json-data",
            r#"{"tenantID":"t","clientID":"c","clientSecret":"s","extra":true}"#,
        ],
    );
    assert!(output.status.success());

    let parsed: Value = serde_json::from_slice(&output.stdout).expect("valid json output");
    assert_eq!(parsed["status"], "Ok");
    assert_eq!(parsed["message"], "Data source is working");
}

#[test]
fn health_reports_error_for_unparseable_settings() {
    let home = TempDir::new().expect("temp home");

    for raw in [r#"{"tenantID":"#, r#"{"clientID":12}"#] {
        let output = run_cmd(&home, &["health", "--json-data", raw]);
        assert!(output.status.success());

        let parsed: Value = serde_json::from_slice(&output.stdout).expect("valid json output");
        assert_eq!(parsed["status"], "Error");
        assert!(parsed["message"]
            .as_str()
            .unwrap_or_default()
            .starts_with("Unable to parse datasource settings"));
    }
}

#[test]
fn health_uses_configured_datasource_by_default() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());

    let output = run_cmd(&home, &["health"]);
    assert!(output.status.success());
    let parsed: Value = serde_json::from_slice(&output.stdout).expect("valid json output");
    assert_eq!(parsed["status"], "Ok");
}

#[test]
fn query_rejects_invalid_timestamps() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(
        &home,
        &[
            "query",
            "--subscription",
            "sub-1",
            "--from",
            "yesterday",
            "--to",
            "2024-01-04",
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid timestamp 'yesterday'"));
}

#[test]
fn query_rejects_malformed_query_payload() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(
        &home,
        &[
            "query",
            "--query-json",
            r#"{"queryText": 5}"#,
            "--from",
            "2024-01-01",
            "--to",
            "2024-01-04",
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("QueryDecode"));
}

#[test]
fn query_rejects_reversed_range() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(
        &home,
        &[
            "query",
            "--subscription",
            "sub-1",
            "--from",
            "2024-01-05T00:00:00Z",
            "--to",
            "2024-01-01T00:00:00Z",
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("before it starts"));
}
