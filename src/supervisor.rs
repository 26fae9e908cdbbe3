//! Lifecycle management for one supervised program.
//!
//! Every operation derives the daemon's state from the PID file and the process table
//! at call time; nothing is cached between calls. `start`, `stop` and `zap` serialize on
//! the PID file's advisory lock, so concurrent invocations against the same PID file
//! cannot both observe "not running" and both spawn.
use nix::{
    errno::Errno,
    sys::{
        signal::Signal,
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::Pid,
};
use serde::Serialize;
use std::{
    fmt,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::DaemonConfig,
    constants::{FORCE_KILL_GRACE, STOP_POLL_INTERVAL},
    error::SupervisorError,
    pidfile::{PidFile, PidLock},
    process, spawn,
};

/// Observed state of a PID file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "pid", rename_all = "snake_case")]
pub enum DaemonState {
    /// No PID file, or one that cannot be read.
    NotRunning,
    /// The recorded process is alive and runs the configured executable.
    Running(u32),
    /// The recorded process is gone or is some other program.
    Stale(u32),
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonState::NotRunning => write!(f, "not running"),
            DaemonState::Running(pid) => write!(f, "running (pid {pid})"),
            DaemonState::Stale(pid) => write!(f, "stale (pid {pid})"),
        }
    }
}

/// State of one instance PID file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceStatus {
    pub pid_file: PathBuf,
    #[serde(flatten)]
    pub state: DaemonState,
}

/// Starts, stops and inspects the program described by a [`DaemonConfig`].
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: DaemonConfig,
}

impl Supervisor {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    fn primary(&self) -> PidFile {
        PidFile::new(self.config.pid_file())
    }

    /// PID files this supervisor is responsible for.
    fn tracked(&self) -> Vec<PidFile> {
        if self.config.multiple() {
            self.primary().instances()
        } else {
            vec![self.primary()]
        }
    }

    fn not_running(&self) -> SupervisorError {
        SupervisorError::NotRunning {
            name: self.config.name().to_string(),
            pid_file: self.config.pid_file().to_path_buf(),
        }
    }

    /// Derives the state recorded in `pid_file`.
    fn state_of(&self, pid_file: &PidFile) -> DaemonState {
        match pid_file.read() {
            Ok(Some(pid)) => {
                if process::is_alive(pid)
                    && process::runs_executable(pid, self.config.executable())
                {
                    DaemonState::Running(pid)
                } else {
                    DaemonState::Stale(pid)
                }
            }
            Ok(None) => DaemonState::NotRunning,
            Err(err) => {
                debug!(
                    "Treating unreadable PID file {} as not running: {err}",
                    pid_file.path().display()
                );
                DaemonState::NotRunning
            }
        }
    }

    /// Picks the PID file the next instance is recorded in. Caller holds the lock.
    fn claim_slot(&self, primary: &PidFile) -> Result<PidFile, SupervisorError> {
        match self.state_of(primary) {
            DaemonState::NotRunning => Ok(primary.clone()),
            DaemonState::Stale(pid) => {
                warn!(
                    "Overwriting stale PID file {} (PID {pid} is gone or foreign)",
                    primary.path().display()
                );
                Ok(primary.clone())
            }
            DaemonState::Running(pid) if !self.config.multiple() => {
                Err(SupervisorError::AlreadyRunning {
                    name: self.config.name().to_string(),
                    pid,
                    pid_file: primary.path().to_path_buf(),
                })
            }
            DaemonState::Running(pid) => (1..=u32::MAX)
                .map(|index| primary.instance(index))
                .find(|candidate| {
                    !matches!(self.state_of(candidate), DaemonState::Running(_))
                })
                .ok_or_else(|| SupervisorError::AlreadyRunning {
                    name: self.config.name().to_string(),
                    pid,
                    pid_file: primary.path().to_path_buf(),
                }),
        }
    }

    /// Launches the program and records its PID.
    ///
    /// Fails with [`SupervisorError::AlreadyRunning`] when a live instance is recorded
    /// and multiple instances are not allowed. A stale PID file is overwritten.
    pub fn start(&self) -> Result<u32, SupervisorError> {
        let primary = self.primary();
        let _lock = PidLock::acquire(&primary)?;

        let slot = self.claim_slot(&primary)?;
        let pid = spawn::launch(&self.config)?;

        if let Err(err) = slot.write(pid) {
            error!(
                "Failed to record PID {pid} for '{}'; killing the untracked instance",
                self.config.name()
            );
            if let Err(kill_err) = process::signal_tree(pid, Signal::SIGKILL) {
                warn!("Failed to kill untracked PID {pid}: {kill_err}");
            }
            return Err(err);
        }

        info!(
            "Started '{}' with PID {pid} ({})",
            self.config.name(),
            slot.path().display()
        );
        Ok(pid)
    }

    /// Reports the state of the primary PID file. Never fails.
    pub fn status(&self) -> DaemonState {
        self.state_of(&self.primary())
    }

    /// Reports every instance PID file present, the primary one first.
    pub fn status_all(&self) -> Vec<InstanceStatus> {
        self.primary()
            .instances()
            .into_iter()
            .map(|pid_file| InstanceStatus {
                state: self.state_of(&pid_file),
                pid_file: pid_file.path().to_path_buf(),
            })
            .collect()
    }

    /// Terminates the recorded instance(s) and removes their PID files.
    ///
    /// Sends SIGTERM, waits up to `timeout`, then SIGKILL with a short grace period.
    /// Stale PID files found on the way are removed. Returns the PIDs that were stopped.
    pub fn stop(&self, timeout: Duration) -> Result<Vec<u32>, SupervisorError> {
        let primary = self.primary();
        let _lock = PidLock::acquire(&primary)?;

        let mut stopped = Vec::new();
        for pid_file in self.tracked() {
            match self.state_of(&pid_file) {
                DaemonState::NotRunning => {}
                DaemonState::Stale(pid) => {
                    warn!(
                        "Removing stale PID file {} (PID {pid})",
                        pid_file.path().display()
                    );
                    pid_file.remove()?;
                }
                DaemonState::Running(pid) => {
                    info!("Stopping '{}' (PID {pid})", self.config.name());
                    Self::terminate(pid, timeout)?;
                    pid_file.remove()?;
                    stopped.push(pid);
                }
            }
        }

        if stopped.is_empty() {
            return Err(self.not_running());
        }

        info!("Stopped '{}' ({stopped:?})", self.config.name());
        Ok(stopped)
    }

    /// SIGTERM, bounded wait, SIGKILL, bounded wait.
    fn terminate(pid: u32, timeout: Duration) -> Result<(), SupervisorError> {
        if !process::signal_tree(pid, Signal::SIGTERM)? {
            debug!("PID {pid} exited before SIGTERM could be delivered");
            return Ok(());
        }

        if process::wait_for_exit(pid, timeout) {
            return Ok(());
        }

        warn!("PID {pid} did not exit within {timeout:?} after SIGTERM; sending SIGKILL");
        if !process::signal_tree(pid, Signal::SIGKILL)? {
            return Ok(());
        }

        if process::wait_for_exit(pid, FORCE_KILL_GRACE) {
            Ok(())
        } else {
            error!("PID {pid} survived SIGKILL");
            Err(SupervisorError::TimeoutExceeded { pid, timeout })
        }
    }

    /// Stops (tolerating [`SupervisorError::NotRunning`]) and starts again.
    pub fn restart(&self, timeout: Duration) -> Result<u32, SupervisorError> {
        match self.stop(timeout) {
            Ok(_) => {}
            Err(SupervisorError::NotRunning { .. }) => {
                debug!("'{}' was not running before restart", self.config.name());
            }
            Err(err) => return Err(err),
        }

        self.start()
    }

    /// Sends SIGHUP to every live instance.
    pub fn reload(&self) -> Result<Vec<u32>, SupervisorError> {
        let mut signalled = Vec::new();
        for pid_file in self.tracked() {
            if let DaemonState::Running(pid) = self.state_of(&pid_file)
                && process::signal_process(pid, Signal::SIGHUP)?
            {
                info!("Sent SIGHUP to '{}' (PID {pid})", self.config.name());
                signalled.push(pid);
            }
        }

        if signalled.is_empty() {
            return Err(self.not_running());
        }
        Ok(signalled)
    }

    /// Removes every instance PID file without touching any process.
    pub fn zap(&self) -> Result<Vec<PathBuf>, SupervisorError> {
        let primary = self.primary();
        let _lock = PidLock::acquire(&primary)?;

        let mut removed = Vec::new();
        for pid_file in primary.instances() {
            if pid_file.remove()? {
                info!("Removed PID file {}", pid_file.path().display());
                removed.push(pid_file.path().to_path_buf());
            }
        }
        Ok(removed)
    }

    /// Blocks until the instance `pid` exits, then removes its PID file.
    ///
    /// Used for foreground runs. When `shutdown` becomes true the instance gets SIGTERM,
    /// then SIGKILL once the configured stop timeout has passed. Returns the exit code
    /// when the instance is a child of this process (128 + signal number for signal
    /// deaths, including the ones delivered here).
    pub fn wait(
        &self,
        pid: u32,
        shutdown: &AtomicBool,
    ) -> Result<Option<i32>, SupervisorError> {
        let target = Pid::from_raw(pid as i32);
        let timeout = self.config.stop_timeout();
        let mut escalation: Option<(Signal, Instant)> = None;

        let code = loop {
            if shutdown.load(Ordering::SeqCst) {
                match escalation {
                    None => {
                        info!("Shutdown requested; stopping '{}'", self.config.name());
                        process::signal_tree(pid, Signal::SIGTERM)?;
                        escalation = Some((Signal::SIGTERM, Instant::now() + timeout));
                    }
                    Some((Signal::SIGTERM, deadline)) if Instant::now() >= deadline => {
                        warn!(
                            "PID {pid} did not exit within {timeout:?} after SIGTERM; sending SIGKILL"
                        );
                        process::signal_tree(pid, Signal::SIGKILL)?;
                        escalation =
                            Some((Signal::SIGKILL, Instant::now() + FORCE_KILL_GRACE));
                    }
                    Some((_, deadline)) if Instant::now() >= deadline => {
                        error!("PID {pid} survived SIGKILL");
                        return Err(SupervisorError::TimeoutExceeded { pid, timeout });
                    }
                    Some(_) => {}
                }
            }

            match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => break Some(code),
                Ok(WaitStatus::Signaled(_, sig, _)) => break Some(128 + sig as i32),
                Ok(_) => {}
                Err(Errno::ECHILD) => {
                    if !process::is_alive(pid) {
                        break None;
                    }
                }
                Err(source) => return Err(SupervisorError::Signal { pid, source }),
            }

            thread::sleep(STOP_POLL_INTERVAL);
        };

        info!("'{}' (PID {pid}) exited with {code:?}", self.config.name());
        self.forget(pid)?;
        Ok(code)
    }

    /// Removes the PID file that still records `pid`, if any.
    fn forget(&self, pid: u32) -> Result<(), SupervisorError> {
        let primary = self.primary();
        let _lock = PidLock::acquire(&primary)?;

        for pid_file in primary.instances() {
            if matches!(pid_file.read(), Ok(Some(recorded)) if recorded == pid) {
                pid_file.remove()?;
            }
        }
        Ok(())
    }
}
