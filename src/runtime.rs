//! Environment-derived runtime directories.
use std::{env, path::PathBuf};

use crate::constants::{DATA_DIR, ENV_BASE_DIR, ENV_HOME, ENV_LOG_DIR};

/// Directories the configuration collaborator derives defaults from.
///
/// Captured once in `main` and passed down explicitly; nothing below the binary reads
/// the process environment for paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEnv {
    /// Home directory of the invoking user.
    pub home_dir: PathBuf,
    /// Base install directory; relative executables resolve against it.
    pub base_dir: PathBuf,
    /// Where output logs go unless the configuration says otherwise.
    pub log_dir: PathBuf,
    /// Where PID files go unless the configuration says otherwise.
    pub run_dir: PathBuf,
}

impl RuntimeEnv {
    /// Reads `DAEMONCTL_HOME`/`HOME`, `DAEMONCTL_BASE_DIR` and `DAEMONCTL_LOG_DIR`.
    pub fn from_process_env() -> Self {
        let home = env::var_os(ENV_HOME)
            .or_else(|| env::var_os("HOME"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));
        let base = env::var_os(ENV_BASE_DIR)
            .map(PathBuf::from)
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));

        let mut runtime = Self::from_home(home, base);
        if let Some(log_dir) = env::var_os(ENV_LOG_DIR) {
            runtime.log_dir = PathBuf::from(log_dir);
        }
        runtime
    }

    /// Derives the default layout below `home`.
    pub fn from_home(home: impl Into<PathBuf>, base: impl Into<PathBuf>) -> Self {
        let home_dir = home.into();
        let data_dir = home_dir.join(DATA_DIR);

        Self {
            log_dir: data_dir.join("logs"),
            run_dir: data_dir.join("run"),
            base_dir: base.into(),
            home_dir,
        }
    }
}
