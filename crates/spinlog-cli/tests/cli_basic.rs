//! Basic CLI E2E tests.
//!
//! Tests invoke the built `spinlog` binary against a throwaway config file
//! and database, and verify outputs.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::TempDir;

/// Temporary config whose store lives next to it.
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        let db = sandbox.dir.path().join("spinlog.db");
        sandbox.ok(&["config", "set", "store.path", db.to_str().unwrap()]);
        sandbox.ok(&["config", "set", "log.console", "false"]);
        sandbox.ok(&["config", "set", "gpio.debounce_ms", "0"]);
        sandbox.ok(&["config", "set", "capture.poll_interval_secs", "0.005"]);
        sandbox
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_spinlog"));
        cmd.arg("--config").arg(self.config_path()).args(args);
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Run a CLI command and return (stdout, stderr, exit code).
    fn run(&self, args: &[&str], stdin: Option<&str>) -> (String, String, i32) {
        let mut cmd = self.command(args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().expect("Failed to execute CLI command");
        {
            let mut pipe = child.stdin.take().unwrap();
            if let Some(input) = stdin {
                pipe.write_all(input.as_bytes()).unwrap();
            }
        }
        let output = child.wait_with_output().unwrap();
        (
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
            output.status.code().unwrap_or(-1),
        )
    }

    fn ok(&self, args: &[&str]) -> String {
        let (stdout, stderr, code) = self.run(args, None);
        assert_eq!(code, 0, "CLI command failed: {args:?}\n{stderr}");
        stdout
    }
}

fn json_lines(stdout: &str) -> Vec<serde_json::Value> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_config_path_and_defaults() {
    let sandbox = Sandbox::new();
    let path = sandbox.ok(&["config", "path"]);
    assert_eq!(Path::new(path.trim()), sandbox.config_path());
    assert_eq!(sandbox.ok(&["config", "get", "capture.user"]).trim(), "default");
    assert_eq!(
        sandbox.ok(&["config", "get", "gpio.pedal_sensor_pin"]).trim(),
        "17"
    );

    let shown: serde_json::Value = serde_json::from_str(&sandbox.ok(&["config", "show"])).unwrap();
    assert_eq!(shown["cadence"]["pedaling_timeout_secs"], 5.0);
}

#[test]
fn test_config_set_roundtrip_and_validation() {
    let sandbox = Sandbox::new();
    sandbox.ok(&["config", "set", "capture.user", "rider"]);
    assert_eq!(sandbox.ok(&["config", "get", "capture.user"]).trim(), "rider");

    let (_, stderr, code) = sandbox.run(&["config", "set", "gpio.start_stop_pin", "17"], None);
    assert_eq!(code, 1);
    assert!(stderr.starts_with("error:"), "{stderr}");

    let (_, stderr, code) = sandbox.run(&["config", "get", "no.such.key"], None);
    assert_eq!(code, 1);
    assert!(stderr.contains("no.such.key"), "{stderr}");
}

#[test]
fn test_sessions_list_empty() {
    let sandbox = Sandbox::new();
    assert_eq!(sandbox.ok(&["sessions", "list"]).trim(), "no workouts recorded");
    assert_eq!(sandbox.ok(&["sessions", "list", "--json"]).trim(), "[]");
    assert_eq!(sandbox.ok(&["recover"]).trim(), "no open workouts");

    let (_, stderr, code) = sandbox.run(&["sessions", "show", "3"], None);
    assert_eq!(code, 1);
    assert!(stderr.contains("Unknown workout 3"), "{stderr}");
}

#[test]
fn test_watch_once_without_session() {
    let sandbox = Sandbox::new();
    let line = sandbox.ok(&["watch", "--once", "--json"]);
    let reading: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(reading["status"], "no_session");
}

#[test]
fn test_watch_once_with_unavailable_store() {
    let sandbox = Sandbox::new();
    let not_a_db = sandbox.dir.path().join("dbdir");
    std::fs::create_dir(&not_a_db).unwrap();
    sandbox.ok(&["config", "set", "store.path", not_a_db.to_str().unwrap()]);

    let (stdout, stderr, code) = sandbox.run(&["watch", "--once", "--json"], None);
    assert_eq!(code, 0, "{stderr}");
    let reading: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(reading["status"], "no_session");

    assert_eq!(
        sandbox.ok(&["watch", "--once"]).trim(),
        "no workout in progress"
    );
}

#[test]
fn test_simulated_run_records_workout() {
    let sandbox = Sandbox::new();
    let (stdout, stderr, code) = sandbox.run(
        &["run", "--simulate"],
        Some("p\ns\np 20\np 20\np 20\ns\n"),
    );
    assert_eq!(code, 0, "{stderr}");

    let events = json_lines(&stdout);
    let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        [
            "SessionOpened",
            "PedalLogged",
            "PedalLogged",
            "PedalLogged",
            "SessionClosed"
        ]
    );
    assert_eq!(events[4]["pedal_strokes"], 3);

    let sessions: serde_json::Value =
        serde_json::from_str(&sandbox.ok(&["sessions", "list", "--json"])).unwrap();
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert!(!sessions[0]["end"].is_null());

    let id = sessions[0]["id"].to_string();
    let summary: serde_json::Value =
        serde_json::from_str(&sandbox.ok(&["sessions", "show", &id, "--json"])).unwrap();
    assert_eq!(summary["pedal_strokes"], 3);
    assert!(summary["max_rpm"].as_f64().unwrap() > 0.0);
}

#[test]
fn test_run_without_hardware_fails_fast() {
    if cfg!(feature = "rpi") {
        return;
    }
    let sandbox = Sandbox::new();
    let (_, stderr, code) = sandbox.run(&["run"], None);
    assert_eq!(code, 1);
    assert!(stderr.contains("hardware unavailable"), "{stderr}");
}
