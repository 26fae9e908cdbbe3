//! Output log files for the managed program.
use chrono::Utc;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::Path,
};

use crate::{config::DaemonConfig, error::SupervisorError};

/// Opens a log file for appending, creating its directory first.
fn open_append(path: &Path) -> Result<File, SupervisorError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| SupervisorError::io(parent, e))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SupervisorError::io(path, e))
}

/// Opens the stdout and stderr log files configured for `config`.
///
/// When both streams point at the same path they share one open file description so
/// appended lines interleave instead of overwriting each other.
pub fn open_log_files(config: &DaemonConfig) -> Result<(File, File), SupervisorError> {
    let stdout = open_append(config.stdout_log())?;
    let stderr = if config.stderr_log() == config.stdout_log() {
        stdout
            .try_clone()
            .map_err(|e| SupervisorError::io(config.stderr_log(), e))?
    } else {
        open_append(config.stderr_log())?
    };

    Ok((stdout, stderr))
}

/// Appends a timestamped line announcing a new run of the program.
pub fn write_banner(log: &mut File, config: &DaemonConfig) -> io::Result<()> {
    let args: Vec<_> = config
        .args()
        .iter()
        .map(|arg| arg.to_string_lossy())
        .collect();
    writeln!(
        log,
        "[{}] daemonctl: starting {} {}",
        Utc::now().to_rfc3339(),
        config.executable().display(),
        args.join(" ")
    )
}

/// Returns the last `lines` lines of the log at `path`.
pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

    let start = all_lines.len().saturating_sub(lines);
    Ok(all_lines[start..].to_vec())
}
