//! Constants and tunables for daemonctl.
//!
//! Timing, file naming and exit codes used across the supervisor live here so the
//! CLI and the library agree on them.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Suffix appended to the PID file path to form its advisory lock file.
pub const PID_LOCK_SUFFIX: &str = ".lock";

/// Extension used for PID files when the configuration does not name one.
pub const PID_FILE_EXTENSION: &str = "pid";

/// Extension of the combined output log written for the managed program.
pub const OUTPUT_LOG_EXTENSION: &str = "output";

/// Default configuration file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "daemonctl.yaml";

/// Data directory below the user's home, holding runs and logs.
pub const DATA_DIR: &str = ".local/share/daemonctl";

// ============================================================================
// Environment Variables
// ============================================================================

/// Overrides the home directory used to derive default paths.
pub const ENV_HOME: &str = "DAEMONCTL_HOME";

/// Base install directory; relative executables resolve against it.
pub const ENV_BASE_DIR: &str = "DAEMONCTL_BASE_DIR";

/// Directory receiving the managed program's output logs.
pub const ENV_LOG_DIR: &str = "DAEMONCTL_LOG_DIR";

// ============================================================================
// Process Management Timing
// ============================================================================

/// Interval between liveness checks while waiting for a process to exit.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long a process gets to disappear after SIGKILL before stop gives up.
pub const FORCE_KILL_GRACE: Duration = Duration::from_secs(2);

/// Graceful stop timeout applied when the configuration does not set one.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Exit Codes
// ============================================================================

/// Generic failure (configuration, usage, unexpected errors).
pub const EXIT_FAILURE: i32 = 1;

/// `status` exit code when the PID file points to a dead or foreign process.
pub const EXIT_STALE: i32 = 1;

/// Nothing is running (also the `status` code for a clean not-running state).
pub const EXIT_NOT_RUNNING: i32 = 3;

/// A live instance already exists.
pub const EXIT_ALREADY_RUNNING: i32 = 4;

/// The managed program could not be launched.
pub const EXIT_SPAWN_FAILED: i32 = 5;

/// PID file, lock file or log directory could not be written.
pub const EXIT_IO_ERROR: i32 = 6;

/// The process survived forceful termination.
pub const EXIT_TIMEOUT: i32 = 7;
