//! CLI integration tests for the cmdq command-line interface.
//!
//! Every test runs against its own temporary directory: config dir, log dir,
//! database and working directory are all isolated.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// An isolated cmdq environment.
struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn db(&self) -> PathBuf {
        self.path().join("queue.db")
    }

    /// A cmdq command bound to this environment's config, logs and database.
    fn cmdq(&self) -> Command {
        let mut cmd = Command::cargo_bin("cmdq").unwrap();
        cmd.current_dir(self.path())
            .env("CMDQ_CONFIG_DIR", self.path().join("config"))
            .env("CMDQ_LOG_DIR", self.path().join("logs"))
            .env_remove("CMDQ_DB_PATH")
            .env_remove("CMDQ_SYSTEM_COMMAND_WRAPPER")
            .env_remove("CMDQ_SYSTEM_COMMAND_STRICT")
            .arg("--db")
            .arg(self.db());
        cmd
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Enqueue `file` and return the new run's id.
    fn enqueue(&self, file: &Path) -> String {
        let output = self
            .cmdq()
            .args(["--json", "enqueue"])
            .arg(file)
            .output()
            .unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        value["id"].as_str().unwrap().to_string()
    }

    fn show_json(&self, id: &str) -> serde_json::Value {
        let output = self.cmdq().args(["--json", "show", id]).output().unwrap();
        assert!(output.status.success());
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("cmdq")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("tick"))
        .stdout(predicate::str::contains("enqueue"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_displays() {
    Command::cargo_bin("cmdq")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cmdq"));
}

#[test]
fn test_unknown_subcommand_rejected() {
    Command::cargo_bin("cmdq")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_prints_effective_values() {
    let env = Env::new();
    env.cmdq()
        .arg("config")
        .env("CMDQ_LOCK_TIMEOUT_MINUTES", "42")
        .assert()
        .success()
        .stdout(predicate::str::contains("poll_cron"))
        .stdout(predicate::str::contains("lock_timeout_minutes = 42"))
        .stdout(predicate::str::contains("queue.db"));
}

#[test]
fn test_config_file_in_config_dir_is_loaded() {
    let env = Env::new();
    std::fs::create_dir_all(env.path().join("config")).unwrap();
    env.write(
        "config/config.toml",
        "[system_command]\nwrapper = \"doas {command}\"\n",
    );
    env.cmdq()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("doas {command}"));
}

#[test]
fn test_config_dir_flag_drives_reported_paths() {
    let env = Env::new();
    let explicit = env.path().join("explicit");
    let logs = explicit.join("logs");
    env.cmdq()
        .env("CMDQ_CONFIG_DIR", env.path().join("from-env"))
        .env_remove("CMDQ_LOG_DIR")
        .arg("--config-dir")
        .arg(&explicit)
        .args(["config", "--paths"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "config dir: {}",
            explicit.display()
        )))
        .stdout(predicate::str::contains(format!("logs:       {}", logs.display())))
        .stdout(predicate::str::contains("from-env").not());
}

#[test]
fn test_invalid_env_override_fails() {
    let env = Env::new();
    env.cmdq()
        .arg("config")
        .env("CMDQ_LOCK_TIMEOUT_MINUTES", "soon")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CMDQ_LOCK_TIMEOUT_MINUTES"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_list_empty_queue() {
    let env = Env::new();
    env.cmdq()
        .args(["list", "--pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No command runs"));
}

#[test]
fn test_enqueue_rejects_duplicate_order() {
    let env = Env::new();
    let file = env.write(
        "dup.toml",
        r#"
directory = "."

[[steps]]
label = "one"
command = "echo 1"
order = 1

[[steps]]
label = "two"
command = "echo 2"
order = 1
"#,
    );
    env.cmdq()
        .arg("enqueue")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate step order 1"));
}

#[test]
fn test_enqueue_rejects_zero_step_timeout() {
    let env = Env::new();
    let file = env.write(
        "zero.toml",
        r#"
directory = "."

[[steps]]
label = "instant"
command = "echo 1"
order = 1
timeout_ms = 0
"#,
    );
    env.cmdq()
        .arg("enqueue")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout_ms = 0"));
}

#[test]
fn test_enqueue_rejects_unknown_extension() {
    let env = Env::new();
    let file = env.write("run.yaml", "directory: .");
    env.cmdq()
        .arg("enqueue")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported run file extension"));
}

#[cfg(unix)]
#[test]
fn test_enqueue_tick_show() {
    let env = Env::new();
    let file = env.write(
        "run.json",
        r#"{
  "name": "greet",
  "directory": "/",
  "steps": [
    {"label": "say", "command": "echo hi", "order": 1, "run_as_system": false},
    {"label": "blank", "command": "", "order": 2, "run_as_system": false}
  ]
}"#,
    );
    let id = env.enqueue(&file);

    env.cmdq()
        .args(["--json", "tick"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"leased\": 1"))
        .stdout(predicate::str::contains("\"failed\": 1"));

    let run = env.show_json(&id);
    assert_eq!(run["completed"], true);
    assert_eq!(run["error"], true);
    assert_eq!(run["processing"], false);
    assert_eq!(run["failed_step"], "blank");
    let steps = run["steps"].as_array().unwrap();
    assert!(steps[0]["log"].as_str().unwrap().contains("hi"));
    assert_eq!(steps[0]["error"], false);
    assert_eq!(steps[1]["log"], "Step command is empty.");
    assert_eq!(steps[1]["error"], true);

    env.cmdq()
        .args(["list", "--failed"])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("blank"));
}

#[cfg(unix)]
#[test]
fn test_directory_override_and_human_show() {
    let env = Env::new();
    let workdir = env.path().join("work");
    std::fs::create_dir_all(&workdir).unwrap();
    let file = env.write(
        "run.toml",
        r#"
directory = "/nonexistent"

[[steps]]
label = "mark"
command = "touch marker"
order = 1
run_as_system = false
"#,
    );
    env.cmdq()
        .arg("enqueue")
        .arg(&file)
        .arg("--directory")
        .arg(&workdir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued run"));

    env.cmdq().arg("tick").assert().success();
    assert!(workdir.join("marker").exists());
}

#[cfg(unix)]
#[test]
fn test_strict_mode_without_wrapper_fails_step() {
    let env = Env::new();
    let file = env.write(
        "run.toml",
        r#"
directory = "/"

[[steps]]
label = "privileged"
command = "id"
order = 1
"#,
    );
    let id = env.enqueue(&file);

    env.cmdq()
        .arg("tick")
        .env("CMDQ_SYSTEM_COMMAND_STRICT", "true")
        .assert()
        .success();

    let run = env.show_json(&id);
    assert_eq!(run["error"], true);
    assert_eq!(run["failed_step"], "privileged");
    let log = run["steps"][0]["log"].as_str().unwrap();
    assert!(log.contains("no system command wrapper is configured"));
    assert_eq!(run["error_message"].as_str(), Some(log));
}

#[cfg(unix)]
#[test]
fn test_wrapper_applied_to_system_steps() {
    let env = Env::new();
    let file = env.write(
        "run.toml",
        r#"
directory = "/"

[[steps]]
label = "wrapped"
command = "echo inner"
order = 1
"#,
    );
    let id = env.enqueue(&file);

    env.cmdq()
        .arg("tick")
        .env("CMDQ_SYSTEM_COMMAND_WRAPPER", "echo wrapped: && {command}")
        .assert()
        .success();

    let run = env.show_json(&id);
    assert_eq!(run["error"], false);
    let log = run["steps"][0]["log"].as_str().unwrap();
    assert!(log.starts_with("$ echo wrapped: && sh -lc 'echo inner'"));
    assert!(log.contains("wrapped:"));
    assert!(log.contains("inner"));
}

#[test]
fn test_show_unknown_run_fails() {
    let env = Env::new();
    env.cmdq()
        .args(["show", "no-such-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}
