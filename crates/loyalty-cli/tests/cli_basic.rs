//! Basic CLI E2E tests.
//!
//! Tests invoke the built binary against a temporary data directory and
//! verify its JSON output.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(data_dir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_loyalty-cli"))
        .args(args)
        .env("LOYALTY_DATA_DIR", data_dir)
        .env("LOYALTY_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_json(data_dir: &Path, args: &[&str]) -> serde_json::Value {
    let (stdout, stderr, code) = run_cli(data_dir, args);
    assert_eq!(code, 0, "CLI command {args:?} failed: {stderr}");
    serde_json::from_str(&stdout).expect("Failed to parse JSON output")
}

#[test]
fn test_login_twice_same_day() {
    let dir = tempfile::tempdir().unwrap();
    let first = run_json(dir.path(), &["login", "alice", "--at", "2025-03-02T09:00:00Z"]);
    assert_eq!(first["streak"], 1);
    assert_eq!(first["awarded"], 50);

    let again = run_json(dir.path(), &["login", "alice", "--at", "2025-03-02T18:00:00Z"]);
    assert_eq!(again["awarded"], 0);
    assert_eq!(again["message"], "already claimed");

    let balance = run_json(dir.path(), &["balance", "alice"]);
    assert_eq!(balance["balance"], 50);
}

#[test]
fn test_spend_awards_milestone() {
    let dir = tempfile::tempdir().unwrap();
    run_json(dir.path(), &["spend", "bob", "900", "--reference", "inv-1"]);
    let receipt = run_json(dir.path(), &["spend", "bob", "300", "--reference", "inv-2"]);
    assert_eq!(receipt["lifetimeSpent"], 1200);
    assert_eq!(receipt["milestones"][0]["milestoneId"], "bronze");

    let history = run_json(dir.path(), &["history", "--user", "bob"]);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["reason"], "milestone:bronze");

    let profile = run_json(dir.path(), &["profile", "bob"]);
    assert_eq!(profile["milestones"]["bronze"], true);
}

#[test]
fn test_freeze_rejects_bad_duration() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(dir.path(), &["freeze", "carol", "--days", "0"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("durationDays"), "stderr: {stderr}");

    let outcome = run_json(dir.path(), &["freeze", "carol", "--days", "2"]);
    assert_eq!(outcome["entry"]["reason"], "streak_frozen");
}

#[test]
fn test_reward_config_update_and_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = run_json(
        dir.path(),
        &["config", "reward", "update", r#"{"weekly":{"thresholdDays":1,"bonus":5}}"#],
    );
    assert_eq!(cfg["weekly"]["thresholdDays"], 1);
    assert_eq!(cfg["daily"]["baseReward"], 50);

    run_json(dir.path(), &["login", "dave", "--at", "2025-03-02T09:00:00Z"]);
    let report = run_json(dir.path(), &["sweep", "--at", "2025-03-02T23:00:00Z"]);
    assert_eq!(report["awarded"], 1);
    let again = run_json(dir.path(), &["sweep", "--at", "2025-03-02T23:30:00Z"]);
    assert_eq!(again["awarded"], 0);

    let feed = run_json(dir.path(), &["history", "--since", "0"]);
    assert_eq!(feed.as_array().unwrap().len(), 2);
}

#[test]
fn test_app_config_get_set() {
    let dir = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(dir.path(), &["config", "get", "sweeper.run_at"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "00:05");

    let (_, _, code) = run_cli(dir.path(), &["config", "set", "calendar.utc_offset_minutes", "540"]);
    assert_eq!(code, 0);
    let (stdout, _, _) = run_cli(dir.path(), &["config", "get", "calendar.utc_offset_minutes"]);
    assert_eq!(stdout.trim(), "540");

    let (_, stderr, code) = run_cli(dir.path(), &["config", "set", "sweeper.run_at", "25:99"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("sweeper.run_at"), "stderr: {stderr}");
}

#[test]
fn test_invalid_user_id() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(dir.path(), &["balance", "no spaces allowed"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("Invalid user id"), "stderr: {stderr}");
}
