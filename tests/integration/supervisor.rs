//! Lifecycle tests driving the supervisor against real processes.

#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    sync::atomic::AtomicBool,
    thread,
    time::{Duration, Instant},
};

use common::{
    is_process_alive, read_pid, shell, sleeper, wait_for_log_line, wait_for_process_exit,
};
use daemonctl::{DaemonConfig, DaemonState, RunMode, Supervisor, SupervisorError};
use nix::unistd::{Pid, getsid};
use tempfile::tempdir;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn start_status_stop_round_trip() {
    let temp = tempdir().unwrap();
    let supervisor = Supervisor::new(sleeper(temp.path()));
    let pid_path = temp.path().join("d.pid");

    let pid = supervisor.start().expect("start");
    assert_eq!(read_pid(&pid_path), Some(pid));
    assert_eq!(supervisor.status(), DaemonState::Running(pid));

    let stopped = supervisor.stop(STOP_TIMEOUT).expect("stop");
    assert_eq!(stopped, vec![pid]);
    assert_eq!(supervisor.status(), DaemonState::NotRunning);
    assert!(!pid_path.exists());
    assert!(!is_process_alive(pid));
}

#[test]
fn second_start_reports_already_running() {
    let temp = tempdir().unwrap();
    let supervisor = Supervisor::new(sleeper(temp.path()));

    let pid = supervisor.start().expect("first start");
    match supervisor.start() {
        Err(SupervisorError::AlreadyRunning { pid: running, .. }) => {
            assert_eq!(running, pid)
        }
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
    assert_eq!(supervisor.status(), DaemonState::Running(pid));

    supervisor.stop(STOP_TIMEOUT).expect("stop");
}

#[test]
fn dead_pid_is_stale_and_overwritten_by_start() {
    let temp = tempdir().unwrap();
    let pid_path = temp.path().join("d.pid");
    fs::write(&pid_path, "999999\n").unwrap();
    let supervisor = Supervisor::new(sleeper(temp.path()));

    assert_eq!(supervisor.status(), DaemonState::Stale(999999));

    let pid = supervisor.start().expect("start over stale PID file");
    assert_eq!(fs::read_to_string(&pid_path).unwrap(), format!("{pid}\n"));
    assert_eq!(supervisor.status(), DaemonState::Running(pid));

    supervisor.stop(STOP_TIMEOUT).expect("stop");
}

#[test]
fn racing_starts_spawn_exactly_once() {
    let temp = tempdir().unwrap();
    let supervisor = Supervisor::new(sleeper(temp.path()));

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2).map(|_| scope.spawn(|| supervisor.start())).collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("start thread panicked"))
            .collect()
    });

    let started: Vec<u32> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(started.len(), 1, "results: {results:?}");
    assert!(results.iter().any(|r| matches!(
        r,
        Err(SupervisorError::AlreadyRunning { .. })
    )));
    assert_eq!(supervisor.status(), DaemonState::Running(started[0]));

    supervisor.stop(STOP_TIMEOUT).expect("stop");
}

#[test]
fn restart_works_from_every_state() {
    let temp = tempdir().unwrap();
    let supervisor = Supervisor::new(sleeper(temp.path()));

    let first = supervisor.restart(STOP_TIMEOUT).expect("restart from not running");
    assert_eq!(supervisor.status(), DaemonState::Running(first));

    let second = supervisor.restart(STOP_TIMEOUT).expect("restart from running");
    assert_ne!(first, second);
    assert!(!is_process_alive(first));
    assert_eq!(supervisor.status(), DaemonState::Running(second));

    supervisor.stop(STOP_TIMEOUT).expect("stop");
    fs::write(temp.path().join("d.pid"), "999999\n").unwrap();

    let third = supervisor.restart(STOP_TIMEOUT).expect("restart from stale");
    assert_eq!(supervisor.status(), DaemonState::Running(third));

    supervisor.stop(STOP_TIMEOUT).expect("stop");
}

#[test]
fn stop_escalates_to_sigkill_when_sigterm_is_ignored() {
    let temp = tempdir().unwrap();
    let supervisor = Supervisor::new(shell(
        temp.path(),
        "trap '' TERM; sleep 100; echo done",
    ));

    let pid = supervisor.start().expect("start");
    thread::sleep(Duration::from_millis(300));

    let began = Instant::now();
    let stopped = supervisor
        .stop(Duration::from_millis(500))
        .expect("stop with escalation");

    assert_eq!(stopped, vec![pid]);
    assert!(began.elapsed() >= Duration::from_millis(500));
    assert!(began.elapsed() < Duration::from_secs(5));
    assert_eq!(supervisor.status(), DaemonState::NotRunning);
}

#[test]
fn background_instance_leads_its_own_session() {
    let temp = tempdir().unwrap();
    let supervisor = Supervisor::new(sleeper(temp.path()));

    let pid = supervisor.start().expect("start");
    let sid = getsid(Some(Pid::from_raw(pid as i32))).expect("getsid");

    assert_eq!(sid.as_raw(), pid as i32);
    assert_ne!(sid, getsid(None).unwrap());

    supervisor.stop(STOP_TIMEOUT).expect("stop");
}

#[test]
fn output_is_redirected_to_created_log_directory() {
    let temp = tempdir().unwrap();
    let config = shell(temp.path(), "echo to-stdout; echo to-stderr >&2; sleep 100")
        .with_logs(
            temp.path().join("nested/out.log"),
            temp.path().join("nested/err.log"),
        );
    let supervisor = Supervisor::new(config);

    supervisor.start().expect("start");
    wait_for_log_line(&temp.path().join("nested/out.log"), "to-stdout");
    wait_for_log_line(&temp.path().join("nested/err.log"), "to-stderr");

    supervisor.stop(STOP_TIMEOUT).expect("stop");
}

#[test]
fn foreground_wait_returns_exit_code_and_clears_pid_file() {
    let temp = tempdir().unwrap();
    let config = shell(temp.path(), "sleep 0.2; exit 3").with_mode(RunMode::Foreground);
    let supervisor = Supervisor::new(config);

    let pid = supervisor.start().expect("start");
    let shutdown = AtomicBool::new(false);
    let code = supervisor.wait(pid, &shutdown).expect("wait");

    assert_eq!(code, Some(3));
    assert!(!temp.path().join("sh.pid").exists());
}

#[test]
fn foreground_wait_stops_instance_on_shutdown() {
    let temp = tempdir().unwrap();
    let config = sleeper(temp.path())
        .with_mode(RunMode::Foreground)
        .with_stop_timeout(STOP_TIMEOUT);
    let supervisor = Supervisor::new(config);

    let pid = supervisor.start().expect("start");
    let shutdown = AtomicBool::new(true);
    let code = supervisor.wait(pid, &shutdown).expect("wait");

    assert_eq!(code, Some(128 + libc::SIGTERM));
    assert!(!is_process_alive(pid));
    assert_eq!(supervisor.status(), DaemonState::NotRunning);
}

#[test]
fn foreground_wait_escalates_when_sigterm_is_ignored() {
    let temp = tempdir().unwrap();
    let config = shell(temp.path(), "trap '' TERM; while true; do sleep 0.1; done")
        .with_mode(RunMode::Foreground)
        .with_stop_timeout(Duration::from_millis(500));
    let supervisor = Supervisor::new(config);

    let pid = supervisor.start().expect("start");
    thread::sleep(Duration::from_millis(300));
    let shutdown = AtomicBool::new(true);
    let code = supervisor.wait(pid, &shutdown).expect("wait");

    assert_eq!(code, Some(128 + libc::SIGKILL));
    assert!(!temp.path().join("sh.pid").exists());
}

#[test]
fn multiple_instances_use_numbered_pid_files() {
    let temp = tempdir().unwrap();
    let supervisor = Supervisor::new(sleeper(temp.path()).with_multiple(true));

    let pids: Vec<u32> = (0..3).map(|_| supervisor.start().expect("start")).collect();
    assert_eq!(read_pid(&temp.path().join("d.pid")), Some(pids[0]));
    assert_eq!(read_pid(&temp.path().join("d.1.pid")), Some(pids[1]));
    assert_eq!(read_pid(&temp.path().join("d.2.pid")), Some(pids[2]));

    let states: Vec<_> = supervisor
        .status_all()
        .into_iter()
        .map(|instance| instance.state)
        .collect();
    assert_eq!(
        states,
        pids.iter().map(|pid| DaemonState::Running(*pid)).collect::<Vec<_>>()
    );

    let mut stopped = supervisor.stop(STOP_TIMEOUT).expect("stop all");
    stopped.sort_unstable();
    let mut expected = pids.clone();
    expected.sort_unstable();
    assert_eq!(stopped, expected);
    assert_eq!(supervisor.status_all().len(), 1);
    for pid in pids {
        wait_for_process_exit(pid);
    }
}

#[test]
fn reload_delivers_sighup() {
    let temp = tempdir().unwrap();
    let config = shell(
        temp.path(),
        "trap 'echo reloaded' HUP; while true; do sleep 0.1; done",
    );
    let log = config.stdout_log().to_path_buf();
    let supervisor = Supervisor::new(config);

    let pid = supervisor.start().expect("start");
    thread::sleep(Duration::from_millis(300));

    assert_eq!(supervisor.reload().expect("reload"), vec![pid]);
    wait_for_log_line(&log, "reloaded");

    supervisor.stop(STOP_TIMEOUT).expect("stop");
}

#[test]
fn pid_file_in_unwritable_location_is_io_error() {
    let temp = tempdir().unwrap();
    let blocker = temp.path().join("file");
    fs::write(&blocker, "").unwrap();
    let supervisor = Supervisor::new(
        DaemonConfig::new("/bin/sleep", blocker.join("d.pid"))
            .with_args(["100"])
            .with_log_dir(temp.path().join("logs")),
    );

    assert!(matches!(
        supervisor.start(),
        Err(SupervisorError::Io { .. })
    ));
}
