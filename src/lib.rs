//! daemonctl turns a program that runs in the foreground into a managed background
//! service. It launches the program detached from the caller's session, redirects its
//! output to log files, records its PID, and later reports, signals, restarts or stops
//! it through that PID file.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Shared constants and exit codes.
pub mod constants;

/// Error handling.
pub mod error;

/// Output log files.
pub mod logs;

/// PID file persistence and locking.
pub mod pidfile;

/// Process liveness and signalling.
pub mod process;

/// Environment-derived directories.
pub mod runtime;

/// Launching the managed program.
pub mod spawn;

/// Daemon lifecycle operations.
pub mod supervisor;

#[doc(hidden)]
pub mod test_utils;

pub use config::{DaemonConfig, RunMode};
pub use error::{ConfigError, SupervisorError};
pub use supervisor::{DaemonState, InstanceStatus, Supervisor};
