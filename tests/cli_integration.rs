//! Integration tests for the command line.

use std::process::Command;

use tempfile::TempDir;

fn monitor() -> Command {
    Command::new(env!("CARGO_BIN_EXE_subagent-monitor"))
}

#[test]
fn test_watch_command_help() {
    let output = monitor()
        .args(["watch", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    for flag in ["--root", "--pattern", "--poll", "--skip-existing"] {
        assert!(stdout.contains(flag), "Expected {flag} in help, got: {stdout}");
    }
}

#[test]
fn test_replay_prints_summary() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("events.jsonl");
    std::fs::write(
        &log,
        concat!(
            r#"{"event":"session.started","payload":{"book_path":"/books/novel"}}"#,
            "\n",
            r#"{"event":"sub_agent.running","payload":{"job_id":"a","role_name":"Editor","command_text":"!polish","status":"running"}}"#,
            "\n",
            "{not json\n",
            r#"{"event":"sub_agent.failed","payload":{"job_id":"b","status":"failed"}}"#,
            "\n",
        ),
    )
    .unwrap();
    let config = temp_dir.path().join("config.toml");

    let output = monitor()
        .arg("--config")
        .arg(&config)
        .arg("replay")
        .arg(&log)
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "replay failed: {stdout}");
    assert!(stdout.contains("=== Session started ==="));
    assert!(stdout.contains("[Editor] !polish · running"));
    assert!(stdout.contains("[sub-agent]  failed"));
    assert!(stdout
        .trim_end()
        .ends_with("1 running · 0 pending (completed 0, failed 1)"));
}

#[test]
fn test_replay_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let output = monitor()
        .arg("--config")
        .arg(temp_dir.path().join("config.toml"))
        .arg("replay")
        .arg(temp_dir.path().join("missing.jsonl"))
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing.jsonl"), "got: {stderr}");
}

#[test]
fn test_invalid_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("config.toml");
    std::fs::write(&config, "[watch]\nbackend = \"inotify\"\n").unwrap();

    let output = monitor()
        .arg("--config")
        .arg(&config)
        .args(["replay", "whatever.jsonl"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config file"), "got: {stderr}");
}
