#[path = "common/mod.rs"]
mod common;

use std::{fs, path::Path};

use assert_cmd::Command;
use common::{read_pid, wait_for_process_exit};
use predicates::{boolean::PredicateBooleanExt, str::contains};
use tempfile::tempdir;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let config_path = dir.join("daemonctl.yaml");
    fs::write(&config_path, body).expect("failed to write config");
    config_path
}

fn daemonctl(dir: &Path, config: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("daemonctl"));
    cmd.current_dir(dir)
        .env("DAEMONCTL_HOME", dir.join("home"))
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(config);
    cmd
}

fn sleeper_config(dir: &Path) -> std::path::PathBuf {
    write_config(
        dir,
        &format!(
            r#"
executable: /bin/sleep
args: ["100"]
pid_file: "{pid}"
log_dir: "{logs}"
"#,
            pid = dir.join("d.pid").display(),
            logs = dir.join("logs").display(),
        ),
    )
}

#[test]
fn lifecycle_commands_report_distinct_exit_codes() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = sleeper_config(dir);

    daemonctl(dir, &config)
        .arg("start")
        .assert()
        .success()
        .stdout(contains("sleep started"));
    let pid = read_pid(&dir.join("d.pid")).expect("pid recorded");

    daemonctl(dir, &config)
        .arg("status")
        .assert()
        .code(0)
        .stdout(contains(format!("running (pid {pid})")));

    daemonctl(dir, &config).arg("start").assert().code(4);

    daemonctl(dir, &config)
        .args(["stop", "--timeout", "5s"])
        .assert()
        .success()
        .stdout(contains("stopped"));
    wait_for_process_exit(pid);
    assert!(!dir.join("d.pid").exists());

    daemonctl(dir, &config)
        .arg("status")
        .assert()
        .code(3)
        .stdout(contains("not running"));
    daemonctl(dir, &config).arg("stop").assert().code(3);
}

#[test]
fn stale_pid_file_is_reported_and_zapped() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = sleeper_config(dir);
    fs::write(dir.join("d.pid"), "999999\n").unwrap();

    daemonctl(dir, &config)
        .arg("status")
        .assert()
        .code(1)
        .stdout(contains("stale (pid 999999)"));

    daemonctl(dir, &config)
        .args(["status", "--json"])
        .assert()
        .code(1)
        .stdout(contains(r#""state": "stale""#).and(contains(r#""pid": 999999"#)));

    daemonctl(dir, &config)
        .arg("zap")
        .assert()
        .success()
        .stdout(contains("removed"));
    assert!(!dir.join("d.pid").exists());
}

#[test]
fn missing_executable_exits_with_spawn_code() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = write_config(
        dir,
        &format!(
            "executable: \"{}\"\npid_file: \"{}\"\n",
            dir.join("no-such-program").display(),
            dir.join("d.pid").display()
        ),
    );

    daemonctl(dir, &config).arg("start").assert().code(5);
    assert!(!dir.join("d.pid").exists());
}

#[test]
fn missing_config_is_a_generic_failure() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();

    daemonctl(dir, &dir.join("absent.yaml"))
        .arg("status")
        .assert()
        .code(1)
        .stderr(contains("Failed to read config file"));
}

#[test]
fn run_stays_in_foreground_and_cleans_up() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = write_config(
        dir,
        &format!(
            r#"
executable: /bin/sh
args: ["-c", "echo hello-from-child"]
pid_file: "{pid}"
log_dir: "{logs}"
"#,
            pid = dir.join("sh.pid").display(),
            logs = dir.join("logs").display(),
        ),
    );

    daemonctl(dir, &config).arg("run").assert().success();
    assert!(!dir.join("sh.pid").exists());

    daemonctl(dir, &config)
        .args(["logs", "-n", "5"])
        .assert()
        .success()
        .stdout(contains("hello-from-child"));
}

#[test]
fn restart_replaces_running_instance() {
    let temp = tempdir().expect("failed to create tempdir");
    let dir = temp.path();
    let config = sleeper_config(dir);

    daemonctl(dir, &config).arg("restart").assert().success();
    let first = read_pid(&dir.join("d.pid")).expect("pid recorded");

    daemonctl(dir, &config)
        .args(["restart", "-t", "5"])
        .assert()
        .success();
    let second = read_pid(&dir.join("d.pid")).expect("pid recorded");

    assert_ne!(first, second);
    wait_for_process_exit(first);

    daemonctl(dir, &config).arg("stop").assert().success();
    wait_for_process_exit(second);
}
