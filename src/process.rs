//! Liveness, identity and signalling for recorded PIDs.
use nix::{
    errno::Errno,
    sys::{
        signal::{self, Signal},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::Pid,
};
use std::{
    ffi::OsStr,
    path::Path,
    thread,
    time::{Duration, Instant},
};
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::{constants::STOP_POLL_INTERVAL, error::SupervisorError};

/// Converts a recorded PID into a signal target.
///
/// Zero and values outside `pid_t` are rejected: `kill(0, ..)` and negative PIDs address
/// whole process groups.
fn to_pid(pid: u32) -> Option<Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(Pid::from_raw)
}

/// Returns whether `pid` names a live, non-zombie process.
///
/// Exited children of the calling process are reaped on the way.
pub fn is_alive(pid: u32) -> bool {
    let Some(target) = to_pid(pid) else {
        return false;
    };

    match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => return true,
        Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => {
            debug!("Reaped exited child {pid}");
            return false;
        }
        Ok(_) => return true,
        Err(Errno::ECHILD) => {}
        Err(err) => debug!("waitpid({pid}) failed: {err}"),
    }

    match signal::kill(target, None) {
        Ok(()) => !is_zombie(pid),
        // Exists but belongs to someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn is_zombie(pid: u32) -> bool {
    let mut system = System::new();
    let target = sysinfo::Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system.process(target).is_some_and(|process| {
        matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
    })
}

/// Checks whether `pid` runs `executable`, as far as the process table lets us see.
///
/// Compares file names so `/bin/sleep` matches a process whose executable resolved to
/// `/usr/bin/sleep`. The first two command-line words are considered too, which covers
/// scripts started through an interpreter. Processes we cannot inspect are assumed to
/// match.
pub fn runs_executable(pid: u32, executable: &Path) -> bool {
    let Some(expected) = executable.file_name() else {
        return true;
    };

    let mut system = System::new();
    let target = sysinfo::Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::everything(),
    );

    let Some(process) = system.process(target) else {
        return true;
    };

    let exe_name = process.exe().and_then(Path::file_name);
    let cmd_names = process
        .cmd()
        .iter()
        .take(2)
        .filter_map(|word| Path::new(word).file_name());
    let mut candidates = exe_name.into_iter().chain(cmd_names).peekable();

    if candidates.peek().is_none() {
        return true;
    }

    let matched = candidates.any(|name: &OsStr| name == expected);
    if !matched {
        debug!(
            "PID {pid} is alive but does not run {}",
            executable.display()
        );
    }
    matched
}

/// Sends `sig` to `pid` only. Returns `Ok(false)` when the process is already gone.
pub fn signal_process(pid: u32, sig: Signal) -> Result<bool, SupervisorError> {
    let Some(target) = to_pid(pid) else {
        return Ok(false);
    };

    match signal::kill(target, sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(SupervisorError::Signal { pid, source }),
    }
}

/// Sends `sig` to the process group led by `pid` and then to `pid` itself.
///
/// The group is skipped when it is the caller's own, which is the case for children
/// started in foreground mode.
pub fn signal_tree(pid: u32, sig: Signal) -> Result<bool, SupervisorError> {
    let Some(target) = to_pid(pid) else {
        return Ok(false);
    };

    let own_pgid = unsafe { libc::getpgid(0) };
    let child_pgid = unsafe { libc::getpgid(target.as_raw()) };

    if child_pgid >= 0 && child_pgid != own_pgid {
        let kill_result = unsafe { libc::killpg(child_pgid, sig as libc::c_int) };
        if kill_result < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::ESRCH => {
                    debug!("Process group {child_pgid} already gone");
                }
                Some(code) if code == libc::EPERM => {
                    warn!(
                        "Insufficient permissions to signal process group {child_pgid}. Falling back to direct signal"
                    );
                }
                _ => {
                    return Err(SupervisorError::Signal {
                        pid,
                        source: Errno::last(),
                    });
                }
            }
        } else {
            debug!("Sent {sig} to process group {child_pgid}");
        }
    }

    signal_process(pid, sig)
}

/// Polls until `pid` is gone or `timeout` elapses. Returns whether it exited.
pub fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;

    loop {
        if !is_alive(pid) {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
    }
}
