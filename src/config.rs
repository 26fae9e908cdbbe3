//! Daemon configuration and the YAML loader that builds it.
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use strum_macros::{AsRefStr, EnumString};

use crate::{
    constants::{DEFAULT_STOP_TIMEOUT, OUTPUT_LOG_EXTENSION, PID_FILE_EXTENSION},
    error::ConfigError,
    runtime::RuntimeEnv,
};

/// Whether the managed program is detached from the caller.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunMode {
    /// New session, no controlling terminal, survives the caller.
    #[default]
    Background,
    /// Stays in the caller's session; the caller waits for it ("on top").
    #[serde(alias = "ontop", alias = "on_top")]
    #[strum(to_string = "foreground", serialize = "ontop", serialize = "on_top")]
    Foreground,
}

/// Everything the supervisor needs to manage one program.
///
/// Built once (by [`load_config`] or the builder methods) and never mutated afterwards;
/// the builder methods consume and return the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    name: String,
    executable: PathBuf,
    args: Vec<OsString>,
    env: BTreeMap<String, String>,
    working_dir: PathBuf,
    pid_file: PathBuf,
    stdout_log: PathBuf,
    stderr_log: PathBuf,
    mode: RunMode,
    multiple: bool,
    stop_timeout: Duration,
}

impl DaemonConfig {
    /// Creates a configuration for `executable` tracked through `pid_file`.
    ///
    /// Defaults: name is the executable's file name, the working directory and log files
    /// live next to the PID file, background mode, single instance.
    pub fn new(executable: impl Into<PathBuf>, pid_file: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        let pid_file = pid_file.into();
        let name = executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "daemon".to_string());
        let dir = pid_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let output = dir.join(format!("{name}.{OUTPUT_LOG_EXTENSION}"));

        Self {
            name,
            executable,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: dir,
            pid_file,
            stdout_log: output.clone(),
            stderr_log: output,
            mode: RunMode::Background,
            multiple: false,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Sends both streams to `<dir>/<name>.output`.
    pub fn with_log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let output = dir
            .as_ref()
            .join(format!("{}.{OUTPUT_LOG_EXTENSION}", self.name));
        self.stdout_log = output.clone();
        self.stderr_log = output;
        self
    }

    pub fn with_logs(
        mut self,
        stdout: impl Into<PathBuf>,
        stderr: impl Into<PathBuf>,
    ) -> Self {
        self.stdout_log = stdout.into();
        self.stderr_log = stderr.into();
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_multiple(mut self, multiple: bool) -> Self {
        self.multiple = multiple;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Extra environment for the child, on top of the inherited one.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Primary PID file path.
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn stdout_log(&self) -> &Path {
        &self.stdout_log
    }

    pub fn stderr_log(&self) -> &Path {
        &self.stderr_log
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Whether concurrent instances are permitted.
    pub fn multiple(&self) -> bool {
        self.multiple
    }

    /// Graceful stop timeout used when the caller does not pass one.
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }
}

/// On-disk representation of the configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    /// Program to supervise.
    executable: String,
    /// Display name; defaults to the executable's file name.
    name: Option<String>,
    /// Arguments passed after the executable.
    #[serde(default)]
    args: Vec<String>,
    /// Extra environment variables for the program.
    #[serde(default)]
    env: BTreeMap<String, String>,
    working_dir: Option<String>,
    /// Directory holding the PID file.
    run_dir: Option<String>,
    pid_file: Option<String>,
    log_dir: Option<String>,
    stdout_log: Option<String>,
    stderr_log: Option<String>,
    #[serde(default)]
    mode: RunMode,
    #[serde(default)]
    multiple: bool,
    /// Duration string such as `10s` or `1m`.
    stop_timeout: Option<String>,
}

/// Expands `$VAR` and `${VAR}` references from the process environment.
///
/// `$$` yields a literal `$`. Unbalanced forms such as `${VAR` are left untouched.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(
        r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)",
    )
    .map_err(|err| ConfigError::Invalid(err.to_string()))?;

    let mut expanded = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        expanded.push_str(&input[last..whole.start()]);
        match caps.get(1).or_else(|| caps.get(2)) {
            Some(var) => {
                let value = env::var(var.as_str())
                    .map_err(|_| ConfigError::MissingEnvVar(var.as_str().to_string()))?;
                expanded.push_str(&value);
            }
            None => expanded.push('$'),
        }
        last = whole.end();
    }
    expanded.push_str(&input[last..]);

    Ok(expanded)
}

/// Parses a user-facing duration string in the format `<number>[s|m|h]`.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ConfigError::Invalid(
            "Duration value cannot be empty".to_string(),
        ));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped.trim(), 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped.trim(), 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped.trim(), 3600)
    } else {
        (value, 1)
    };

    let amount: u64 = amount_str
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("Invalid duration value: '{raw}'")))?;

    Ok(Duration::from_secs(amount.saturating_mul(multiplier)))
}

/// Resolves an expanded path against `base` unless it is already absolute.
fn resolve_path(raw: &str, base: &Path) -> Result<PathBuf, ConfigError> {
    let path = PathBuf::from(expand_env_vars(raw)?);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(base.join(path))
    }
}

/// Loads the configuration file at `config_path`, filling gaps from `runtime`.
///
/// Relative paths resolve against the file's directory, except the executable, which
/// resolves against the base install directory when it contains a path separator and
/// is otherwise left for `PATH` lookup.
pub fn load_config(
    config_path: &Path,
    runtime: &RuntimeEnv,
) -> Result<DaemonConfig, ConfigError> {
    let content =
        fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
    let file: ConfigFile = serde_yaml::from_str(&content)?;

    let project_dir = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let executable_raw = expand_env_vars(&file.executable)?;
    if executable_raw.trim().is_empty() {
        return Err(ConfigError::Invalid("executable cannot be empty".to_string()));
    }
    let executable = PathBuf::from(&executable_raw);
    let executable = if executable.is_relative() && executable_raw.contains('/') {
        runtime.base_dir.join(executable)
    } else {
        executable
    };

    let name = match file.name {
        Some(name) => expand_env_vars(&name)?,
        None => executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "cannot derive a name from executable '{}'",
                    executable.display()
                ))
            })?,
    };

    let run_dir = match file.run_dir.as_deref() {
        Some(dir) => resolve_path(dir, &project_dir)?,
        None => runtime.run_dir.clone(),
    };
    let pid_file = match file.pid_file.as_deref() {
        Some(path) => resolve_path(path, &project_dir)?,
        None => run_dir.join(format!("{name}.{PID_FILE_EXTENSION}")),
    };
    // The PID file's directory is created before launch, so it is a safe default.
    let working_dir = match file.working_dir.as_deref() {
        Some(dir) => resolve_path(dir, &project_dir)?,
        None => pid_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| run_dir.clone()),
    };
    let log_dir = match file.log_dir.as_deref() {
        Some(dir) => resolve_path(dir, &project_dir)?,
        None => runtime.log_dir.clone(),
    };

    let mut config = DaemonConfig::new(executable, pid_file)
        .with_name(name)
        .with_working_dir(working_dir)
        .with_log_dir(&log_dir)
        .with_mode(file.mode)
        .with_multiple(file.multiple);

    let args = file
        .args
        .iter()
        .map(|arg| expand_env_vars(arg))
        .collect::<Result<Vec<_>, _>>()?;
    config = config.with_args(args);

    for (key, value) in &file.env {
        config = config.with_env(key.clone(), expand_env_vars(value)?);
    }

    if file.stdout_log.is_some() || file.stderr_log.is_some() {
        let stdout = match file.stdout_log.as_deref() {
            Some(path) => resolve_path(path, &project_dir)?,
            None => config.stdout_log().to_path_buf(),
        };
        let stderr = match file.stderr_log.as_deref() {
            Some(path) => resolve_path(path, &project_dir)?,
            None => stdout.clone(),
        };
        config = config.with_logs(stdout, stderr);
    }

    if let Some(raw) = file.stop_timeout.as_deref() {
        config = config.with_stop_timeout(parse_duration(raw)?);
    }

    Ok(config)
}
