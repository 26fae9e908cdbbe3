//! Error handling for daemonctl.
use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::constants::{
    EXIT_ALREADY_RUNNING, EXIT_FAILURE, EXIT_IO_ERROR, EXIT_NOT_RUNNING,
    EXIT_SPAWN_FAILED, EXIT_TIMEOUT,
};

/// Outcomes of a failed supervisor operation.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A live instance is already recorded in the PID file.
    #[error("'{name}' is already running with PID {pid} ({})", pid_file.display())]
    AlreadyRunning {
        /// Daemon name.
        name: String,
        /// PID of the live instance.
        pid: u32,
        /// PID file that recorded it.
        pid_file: PathBuf,
    },

    /// The executable could not be launched.
    #[error("Failed to launch '{}': {source}", executable.display())]
    Spawn {
        /// Program that failed to start.
        executable: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A PID file, lock file or log file could not be read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Stop or reload was requested but nothing is running.
    #[error("'{name}' is not running ({})", pid_file.display())]
    NotRunning {
        /// Daemon name.
        name: String,
        /// PID file that was inspected.
        pid_file: PathBuf,
    },

    /// The process survived both graceful and forceful termination.
    #[error("PID {pid} did not exit within {timeout:?} after SIGTERM and SIGKILL")]
    TimeoutExceeded {
        /// PID that refused to exit.
        pid: u32,
        /// Graceful timeout that was applied.
        timeout: Duration,
    },

    /// Sending a signal failed for a reason other than the process being gone.
    #[error("Failed to signal PID {pid}: {source}")]
    Signal {
        /// Target process.
        pid: u32,
        /// Errno reported by the kernel.
        #[source]
        source: nix::errno::Errno,
    },
}

impl SupervisorError {
    /// Wraps an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SupervisorError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code the CLI reports for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorError::AlreadyRunning { .. } => EXIT_ALREADY_RUNNING,
            SupervisorError::Spawn { .. } => EXIT_SPAWN_FAILED,
            SupervisorError::Io { .. } => EXIT_IO_ERROR,
            SupervisorError::NotRunning { .. } => EXIT_NOT_RUNNING,
            SupervisorError::TimeoutExceeded { .. } => EXIT_TIMEOUT,
            SupervisorError::Signal { .. } => EXIT_FAILURE,
        }
    }
}

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference has no value in the environment.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// Semantically invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Process exit code the CLI reports for configuration failures.
    pub fn exit_code(&self) -> i32 {
        EXIT_FAILURE
    }
}
