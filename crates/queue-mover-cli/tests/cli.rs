//! End-to-end tests for the `queue-mover` binary

use assert_cmd::Command;
use predicates::prelude::*;

fn queue_mover() -> Command {
    let mut cmd = Command::cargo_bin("queue-mover").unwrap();
    cmd.env_remove("QUEUE_MOVER_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_flags() {
    queue_mover()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--src"))
        .stdout(predicate::str::contains("--dst"))
        .stdout(predicate::str::contains("--num-messages"));
}

#[test]
fn test_missing_source_is_a_usage_error() {
    queue_mover()
        .args(["--dst", "orders-v2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--src"));
}

#[test]
fn test_memory_move_finishes_on_idle() {
    queue_mover()
        .args([
            "--src",
            "orders",
            "--dst",
            "orders-v2",
            "--provider",
            "memory",
            "--idle-timeout",
            "1",
            "--log-level",
            "warn",
        ])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"forwarded:\s+0").unwrap());
}

#[test]
fn test_json_report() {
    queue_mover()
        .args([
            "--src",
            "orders",
            "--dst",
            "orders-v2",
            "--provider",
            "memory",
            "--idle-timeout",
            "1",
            "--json-logs",
            "--log-level",
            "warn",
        ])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"trigger\":\"forward_finished\""));
}

#[test]
fn test_invalid_queue_exits_with_argument_code() {
    queue_mover()
        .args(["--src", "bad queue", "--dst", "orders-v2", "--provider", "memory"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("--src"));
}

#[test]
fn test_missing_config_file_exits_with_configuration_code() {
    queue_mover()
        .args([
            "--src",
            "orders",
            "--dst",
            "orders-v2",
            "--config",
            "/nonexistent/queue-mover.toml",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration file not found"));
}
