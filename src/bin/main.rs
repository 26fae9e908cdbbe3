use std::{
    path::Path,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use daemonctl::{
    cli::{Cli, Commands, parse_args},
    config::{DaemonConfig, RunMode, load_config, parse_duration},
    constants::{EXIT_FAILURE, EXIT_NOT_RUNNING, EXIT_STALE},
    error::{ConfigError, SupervisorError},
    logs,
    runtime::RuntimeEnv,
    supervisor::{DaemonState, Supervisor},
};

/// Failures surfaced by the binary, each mapped to an exit code.
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("{0}")]
    Other(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(err) => err.exit_code(),
            CliError::Supervisor(err) => err.exit_code(),
            CliError::Other(_) => EXIT_FAILURE,
        }
    }
}

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    match run(args) {
        Ok(code) => exit_code(code),
        Err(err) => {
            error!("{err}");
            eprintln!("daemonctl: {err}");
            exit_code(err.exit_code())
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(EXIT_FAILURE as u8))
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(args: Cli) -> Result<i32, CliError> {
    let runtime = RuntimeEnv::from_process_env();
    let config = load_config(Path::new(&args.config), &runtime)?;

    match args.command {
        Commands::Start => start(Supervisor::new(config)),
        Commands::Run => start(Supervisor::new(config.with_mode(RunMode::Foreground))),
        Commands::Stop { timeout } => {
            let timeout = resolve_timeout(&config, timeout.as_deref())?;
            let supervisor = Supervisor::new(config);
            let stopped = supervisor.stop(timeout)?;
            println!("{} stopped ({})", supervisor.config().name(), join_pids(&stopped));
            Ok(0)
        }
        Commands::Restart { timeout } => {
            let timeout = resolve_timeout(&config, timeout.as_deref())?;
            let supervisor = Supervisor::new(config);
            let pid = supervisor.restart(timeout)?;
            announce_started(&supervisor, pid)
        }
        Commands::Status { all, json } => status(&Supervisor::new(config), all, json),
        Commands::Reload => {
            let supervisor = Supervisor::new(config);
            let signalled = supervisor.reload()?;
            println!(
                "{} reloaded ({})",
                supervisor.config().name(),
                join_pids(&signalled)
            );
            Ok(0)
        }
        Commands::Zap => {
            let supervisor = Supervisor::new(config);
            let removed = supervisor.zap()?;
            if removed.is_empty() {
                println!("{}: no PID files to remove", supervisor.config().name());
            }
            for path in removed {
                println!("removed {}", path.display());
            }
            Ok(0)
        }
        Commands::Logs { lines } => show_logs(&config, lines),
    }
}

fn start(supervisor: Supervisor) -> Result<i32, CliError> {
    let pid = supervisor.start()?;
    announce_started(&supervisor, pid)
}

/// Reports a fresh start; foreground instances are waited on until they exit.
fn announce_started(supervisor: &Supervisor, pid: u32) -> Result<i32, CliError> {
    println!("{} started (pid {pid})", supervisor.config().name());

    if supervisor.config().mode() == RunMode::Background {
        return Ok(0);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|err| CliError::Other(format!("failed to install signal handler: {err}")))?;

    info!("Waiting for '{}' (PID {pid}) in the foreground", supervisor.config().name());
    let code = supervisor.wait(pid, &shutdown)?;
    Ok(code.unwrap_or(0))
}

fn status(supervisor: &Supervisor, all: bool, json: bool) -> Result<i32, CliError> {
    let name = supervisor.config().name();
    let primary = supervisor.status();

    if all {
        let instances = supervisor.status_all();
        if json {
            let rendered = serde_json::to_string_pretty(&instances)
                .map_err(|err| CliError::Other(err.to_string()))?;
            println!("{rendered}");
        } else {
            for instance in &instances {
                println!("{name}: {} ({})", instance.state, instance.pid_file.display());
            }
        }
    } else if json {
        let rendered = serde_json::to_string_pretty(&primary)
            .map_err(|err| CliError::Other(err.to_string()))?;
        println!("{rendered}");
    } else {
        println!("{name}: {primary}");
    }

    Ok(match primary {
        DaemonState::Running(_) => 0,
        DaemonState::Stale(_) => EXIT_STALE,
        DaemonState::NotRunning => EXIT_NOT_RUNNING,
    })
}

fn show_logs(config: &DaemonConfig, lines: usize) -> Result<i32, CliError> {
    let mut paths = vec![config.stdout_log()];
    if config.stderr_log() != config.stdout_log() {
        paths.push(config.stderr_log());
    }

    for path in paths {
        match logs::tail(path, lines) {
            Ok(tail) => {
                for line in tail {
                    println!("{line}");
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("Log file {} does not exist yet", path.display());
            }
            Err(source) => return Err(SupervisorError::io(path, source).into()),
        }
    }

    Ok(0)
}

fn resolve_timeout(
    config: &DaemonConfig,
    raw: Option<&str>,
) -> Result<std::time::Duration, CliError> {
    match raw {
        Some(raw) => Ok(parse_duration(raw)?),
        None => Ok(config.stop_timeout()),
    }
}

fn join_pids(pids: &[u32]) -> String {
    pids.iter()
        .map(|pid| format!("pid {pid}"))
        .collect::<Vec<_>>()
        .join(", ")
}
