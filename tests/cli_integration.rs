//! CLI integration tests
//!
//! These run the compiled binary and check exit codes per failure category,
//! output formats and the cache subcommand.

mod support;

use std::process::{Command, Output};
use support::{shipyard_bin, StackFixture};

const LOCAL_STACK: &str = r#"
tag: dev
readiness:
  max_attempts: 3
  backoff: fixed
  initial_delay_ms: 10
  max_delay_ms: 10
services:
  - name: store
    context: store
    build_command: ["sh", "-c", "echo compiling store"]
    command: ["sh", "-c", "sleep 1"]
    readiness:
      command: { program: sh, args: ["-c", "exit 0"] }
  - name: api
    context: api
    depends_on: [store]
    build_command: ["sh", "-c", "echo compiling api"]
    command: ["sh", "-c", "sleep 1"]
    artifacts:
      - path: settings.env
        derive_from: shared/settings.env
"#;

fn local_stack() -> StackFixture {
    let fixture = StackFixture::new(LOCAL_STACK);
    fixture.write("store/main.sh", "echo store\n");
    fixture.write("api/main.sh", "echo api\n");
    fixture.write("shared/settings.env", "PORT=8080\n");
    fixture
}

fn shipyard(fixture: &StackFixture, args: &[&str]) -> Output {
    Command::new(shipyard_bin())
        .args(args)
        .env("SHIPYARD_MANIFEST", fixture.manifest_path())
        .env("SHIPYARD_STATE_DIR", fixture.root().join(".state"))
        .env_remove("SHIPYARD_LOG_LEVEL")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute shipyard")
}

#[test]
fn test_cli_help() {
    let output = Command::new(shipyard_bin())
        .arg("--help")
        .output()
        .expect("Failed to execute shipyard");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("shipyard"));
    for command in ["deploy", "plan", "verify", "cache"] {
        assert!(stdout.contains(command), "help should list {}", command);
    }
}

#[test]
fn test_cli_version() {
    let output = Command::new(shipyard_bin())
        .arg("--version")
        .output()
        .expect("Failed to execute shipyard");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_unknown_target_exits_with_configuration_code() {
    let fixture = local_stack();
    let output = shipyard(&fixture, &["deploy", "staging", "-q"]);

    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Unknown target 'staging'"));
}

#[test]
fn test_missing_manifest_exits_with_configuration_code() {
    let fixture = local_stack();
    let missing = fixture.root().join("nowhere.yaml");
    let output = shipyard(
        &fixture,
        &["plan", "local", "--manifest", missing.to_str().unwrap()],
    );

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nowhere.yaml"));
}

#[test]
fn test_missing_artifact_exits_with_verification_code() {
    let fixture = local_stack();
    fixture.remove("shared/settings.env");

    let output = shipyard(&fixture, &["deploy", "local", "--format", "json", "-q"]);
    assert_eq!(output.status.code(), Some(3));

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report should be JSON");
    assert_eq!(report["category"], "verification");
    assert!(report["offending"]
        .as_str()
        .unwrap()
        .ends_with("settings.env"));
    assert_eq!(report["builds"].as_array().unwrap().len(), 0);
}

#[test]
fn test_local_deploy_end_to_end() {
    let fixture = local_stack();

    let output = shipyard(&fixture, &["deploy", "local", "--format", "json", "-q"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr);

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["success"], true);
    assert_eq!(report["build_order"], serde_json::json!(["store", "api"]));
    assert_eq!(report["services"]["api"], "healthy");
    assert_eq!(report["services"]["store"], "healthy");
    assert!(fixture.root().join("api/settings.env").is_file());

    // Second run reuses recorded state
    let output = shipyard(&fixture, &["deploy", "local", "--format", "json", "-q"]);
    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    for entry in report["cache"].as_array().unwrap() {
        assert_eq!(entry["use_cache"], true);
    }
    for build in report["builds"].as_array().unwrap() {
        assert_eq!(build["invoked"], false);
    }
}

#[test]
fn test_plan_json() {
    let fixture = local_stack();
    let output = shipyard(&fixture, &["plan", "local", "--format", "json"]);

    assert!(output.status.success());
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["target"], "local");
    assert_eq!(plan["build_order"], serde_json::json!(["store", "api"]));
    assert_eq!(plan["services"][1]["image"], "api:dev");
}

#[test]
fn test_plan_human_has_no_side_effects() {
    let fixture = local_stack();
    let output = shipyard(&fixture, &["plan", "local"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Target: local"));
    assert!(stdout.contains("1. store"));
    assert!(!fixture.root().join("api/settings.env").exists());
    assert!(!fixture.root().join(".state").exists());
}

#[test]
fn test_verify_derives_artifact() {
    let fixture = local_stack();
    let output = shipyard(&fixture, &["verify", "local"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(derived)"));
    assert!(fixture.root().join("api/settings.env").is_file());
}

#[test]
fn test_cache_list_and_clear() {
    let fixture = local_stack();

    let output = shipyard(&fixture, &["cache", "list"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No build cache state recorded"));

    let output = shipyard(&fixture, &["deploy", "local", "-q"]);
    assert_eq!(output.status.code(), Some(0));

    let output = shipyard(&fixture, &["cache", "list", "--format", "json"]);
    let states: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(states.as_array().unwrap().len(), 2);

    let output = shipyard(&fixture, &["cache", "clear", "api"]);
    assert!(output.status.success());
    let output = shipyard(&fixture, &["cache", "list", "--format", "json"]);
    let states: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(states.as_array().unwrap().len(), 1);
    assert_eq!(states[0]["service"], "store");
}

#[test]
fn test_invalid_env_override_is_rejected() {
    let fixture = local_stack();
    let output = shipyard(&fixture, &["plan", "local", "--env", "NOVALUE"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("KEY=VALUE"));
}
