//! Integration tests driving the `dt` binary end to end.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use tempfile::{NamedTempFile, TempDir};

struct Workspace {
    _dir: TempDir,
    config: NamedTempFile,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("data").join("dt.db");

        let mut config = NamedTempFile::new().unwrap();
        writeln!(config, r#"database_path = "{}""#, db_path.display()).unwrap();
        writeln!(config, "visit_separation_minutes = 10").unwrap();
        config.flush().unwrap();

        Self { _dir: dir, config }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_dt"));
        command.arg("--config").arg(self.config.path()).args(args);
        command
    }

    fn run(&self, args: &[&str]) -> String {
        let output = self.command(args).output().expect("Failed to run dt");
        assert_success(&output);
        String::from_utf8(output.stdout).unwrap()
    }

    fn run_with_stdin(&self, args: &[&str], input: &str) -> String {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("Failed to spawn dt");
        {
            let stdin = child.stdin.as_mut().unwrap();
            stdin.write_all(input.as_bytes()).unwrap();
        }
        let output = child.wait_with_output().expect("Failed to wait for dt");
        assert_success(&output);
        String::from_utf8(output.stdout).unwrap()
    }
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "dt failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn contact_batch(contacts: &[(i64, bool)]) -> String {
    let logs: Vec<String> = contacts
        .iter()
        .map(|&(ts, open)| {
            let value = if open { "true" } else { "false" };
            format!(
                r#"{{"code": "doorcontact_state", "value": "{value}", "event_time": {ts}, "event_from": "1", "event_id": 7}}"#
            )
        })
        .collect();
    format!(
        r#"{{"result": {{"logs": [{}], "has_next": false}}, "fetches": 1}}"#,
        logs.join(",")
    )
}

#[test]
fn test_ingest_derives_openings_and_visits() {
    let ws = Workspace::new();
    ws.run(&["door", "add", "--device", "bf5e70c82cd099e751hy2l", "--contents", "Fiction"]);
    ws.run(&["door", "add", "--device", "bfa3645b8c194e83fb5x58", "--contents", "Toys"]);

    let first = ws.run_with_stdin(
        &["ingest", "--door", "1"],
        &contact_batch(&[(0, true), (50, true), (100, false)]),
    );
    assert!(first.contains("3 new"), "unexpected ingest output: {first}");
    assert!(first.contains("openings: 3 events, 1 created, 0 existing, 1 orphaned"));

    let mut batch_file = NamedTempFile::new().unwrap();
    batch_file
        .write_all(contact_batch(&[(70, true), (170, false)]).as_bytes())
        .unwrap();
    batch_file.flush().unwrap();
    let batch_path = batch_file.path().to_string_lossy().to_string();
    let second = ws.run(&["ingest", "--door", "2", &batch_path]);
    assert!(second.contains("visits: 2 openings, 0 created, 1 updated, 0 unchanged"));

    let visits = ws.run(&["visits", "--json"]);
    let value: serde_json::Value = serde_json::from_str(&visits).unwrap();
    assert_eq!(value[0]["start_ms"], 50);
    assert_eq!(value[0]["duration_ms"], 120);
    assert_eq!(value[0]["doors"], serde_json::json!([1, 2]));
    assert_eq!(
        value[0]["overlaps"],
        serde_json::json!([
            {"door_a": 1, "door_b": 2, "duration_ms": 30},
            {"door_a": 2, "door_b": 1, "duration_ms": 30}
        ])
    );

    let orphans = ws.run(&["orphans"]);
    assert!(orphans.contains("1 orphan events"), "unexpected orphans: {orphans}");
}

#[test]
fn test_update_is_idempotent_across_runs() {
    let ws = Workspace::new();
    ws.run(&["door", "add", "--device", "bf5e70c82cd099e751hy2l"]);
    ws.run_with_stdin(
        &["ingest", "--door", "1", "--no-update"],
        &contact_batch(&[(10, true), (20, false), (30, true), (40, false)]),
    );

    let first = ws.run(&["update", "openings"]);
    assert_eq!(first, "openings: 4 events, 2 created, 0 existing, 0 orphaned\n");
    let second = ws.run(&["update", "openings", "--rebuild"]);
    assert_eq!(second, "openings: 4 events, 0 created, 2 existing, 0 orphaned\n");
    let hard = ws.run(&["update", "all", "-R"]);
    assert!(hard.starts_with("openings: 4 events, 2 created, 0 existing, 0 orphaned\n"));

    let status = ws.run(&["status"]);
    assert!(status.contains("4 events"), "unexpected status: {status}");
    assert!(status.contains("2 openings, 0 uptimes, 0 orphans"));
}

#[test]
fn test_unreadable_input_fails() {
    let ws = Workspace::new();
    let output = ws
        .command(&["ingest", "--door", "7", "/nonexistent/batch.json"])
        .output()
        .expect("Failed to run dt");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read"), "unexpected stderr: {stderr}");

    let output = ws
        .command(&["ingest", "--door", "7"])
        .stdin(Stdio::null())
        .output()
        .expect("Failed to run dt");
    assert!(!output.status.success());
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_dt"))
        .arg("--help")
        .output()
        .expect("Failed to run dt --help");
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    for command in ["door", "ingest", "update", "status", "orphans", "visits"] {
        assert!(help.contains(command), "missing {command} in help: {help}");
    }
}
