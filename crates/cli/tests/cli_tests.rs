//! CLI integration tests

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Run the binary with an isolated config and log file
fn kdeploy(dir: &TempDir, config: &str, args: &[&str]) -> Output {
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, config).expect("Failed to write config");

    Command::new(env!("CARGO_BIN_EXE_kdeploy"))
        .arg("--config")
        .arg(&config_path)
        .arg("--log-file")
        .arg(dir.path().join("run.log"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_kdeploy"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = stdout(&output);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Zero-downtime"), "Should show description");
    assert!(stdout.contains("deploy"), "Should show deploy command");
    assert!(stdout.contains("verify"), "Should show verify command");
    assert!(stdout.contains("plan"), "Should show plan command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_kdeploy"))
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout(&output).contains("kdeploy"), "Should show binary name");
}

#[test]
fn test_deploy_help_lists_release_flags() {
    let output = Command::new(env!("CARGO_BIN_EXE_kdeploy"))
        .args(["deploy", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = stdout(&output);
    assert!(output.status.success());
    for flag in ["--image-tag", "--replicas", "--timeout", "--max-retries", "--health-target"] {
        assert!(stdout.contains(flag), "Should document {}", flag);
    }
}

#[test]
fn test_plan_keeps_full_capacity() {
    let dir = TempDir::new().unwrap();
    let output = kdeploy(&dir, "", &["plan", "--replicas", "2"]);

    let stdout = stdout(&output);
    assert_eq!(output.status.code(), Some(0), "stdout: {}", stdout);
    assert!(stdout.contains("scale up new"));
    assert!(stdout.contains("[OK] 5 steps, max 3 pods, min ready capacity 2/2"));
}

#[test]
fn test_plan_json_output() {
    let dir = TempDir::new().unwrap();
    let output = kdeploy(
        &dir,
        "",
        &["--format", "json", "plan", "--replicas", "3", "--current-replicas", "1"],
    );
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["desired"], 3);
    let steps = plan["steps"].as_array().unwrap();
    let last = steps.last().unwrap();
    assert_eq!(last["old_pods"], 0);
    assert_eq!(last["new_pods"], 3);
}

#[test]
fn test_config_file_is_applied() {
    let dir = TempDir::new().unwrap();
    let output = kdeploy(&dir, "replica_count = 3\n", &["plan"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("min ready capacity 3/3"));
}

#[test]
fn test_flags_override_config_file() {
    let dir = TempDir::new().unwrap();
    let output = kdeploy(&dir, "replica_count = 3\n", &["plan", "--replicas", "4"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("min ready capacity 4/4"));
}

#[test]
fn test_invalid_release_is_fatal() {
    let dir = TempDir::new().unwrap();
    let output = kdeploy(&dir, "", &["plan", "--replicas", "0"]);

    let stdout = stdout(&output);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout.starts_with("[ERROR] fatal:"), "stdout: {}", stdout);
    assert!(stdout.contains("replica_count"));
}

#[test]
fn test_unreadable_kubeconfig_is_prereq_failure() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("no-such-kubeconfig");
    let output = kdeploy(
        &dir,
        "",
        &["--kubeconfig", path_str(&missing), "deploy", "--image-tag", "v2"],
    );

    let stdout = stdout(&output);
    assert_eq!(output.status.code(), Some(2));
    assert!(stdout.starts_with("[ERROR] prerequisites not met:"), "stdout: {}", stdout);
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("temp path is not UTF-8")
}
