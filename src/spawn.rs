//! Launching the managed program.
use std::{
    os::unix::process::CommandExt,
    process::{Command, Stdio},
};
use tracing::{debug, error, warn};

use crate::{
    config::{DaemonConfig, RunMode},
    error::SupervisorError,
    logs::{open_log_files, write_banner},
};

/// Builds the command for `config` without running it.
///
/// In background mode the child calls `setsid()` before `exec`, becoming the leader of a
/// new session and process group with no controlling terminal. It keeps running after
/// the caller exits and can be signalled as a group. Foreground children stay in the
/// caller's session and process group and keep the caller's stdin.
fn build_command(config: &DaemonConfig) -> Result<Command, SupervisorError> {
    let (mut stdout, stderr) = open_log_files(config)?;
    if let Err(err) = write_banner(&mut stdout, config) {
        warn!(
            "Failed to write start banner to {}: {err}",
            config.stdout_log().display()
        );
    }

    let mut cmd = Command::new(config.executable());
    cmd.args(config.args())
        .current_dir(config.working_dir())
        .envs(config.env())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    match config.mode() {
        RunMode::Background => {
            cmd.stdin(Stdio::null());
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }
        RunMode::Foreground => {
            cmd.stdin(Stdio::inherit());
        }
    }

    Ok(cmd)
}

/// Starts the managed program and returns its PID.
///
/// The `Child` handle is dropped without waiting; later liveness checks reap it.
pub fn launch(config: &DaemonConfig) -> Result<u32, SupervisorError> {
    let mut cmd = build_command(config)?;
    debug!("Executing command: {cmd:?}");

    match cmd.spawn() {
        Ok(child) => {
            let pid = child.id();
            debug!(
                "'{}' started with PID {pid} in {} mode",
                config.name(),
                config.mode().as_ref()
            );
            Ok(pid)
        }
        Err(source) => {
            error!("Failed to launch '{}': {source}", config.name());
            Err(SupervisorError::Spawn {
                executable: config.executable().to_path_buf(),
                source,
            })
        }
    }
}
