mod cli;
mod output;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands, ModeArg, OutputFormat};
use typecheck_worker::config::{ProjectDefaults, WorkerConfig};
use typecheck_worker::engine::Session;
use typecheck_worker::files::FilesChange;
use typecheck_worker::rpc::{CallError, Pool, WorkerHost, serve};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Worker { config } => {
            let config: WorkerConfig =
                serde_json::from_str(&config).context("invalid worker configuration")?;
            setup_tracing(cli.verbose, config.profile);
            runtime()?.block_on(run_worker(config))
        }
        Commands::Check {
            tsconfig,
            build,
            mode,
            watch_mode,
            format,
        } => {
            setup_tracing(cli.verbose, false);
            let config = worker_config(&tsconfig, build, mode)?;
            let failed = runtime()?.block_on(check(config, watch_mode, format, cli.verbose))?;
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Deps {
            tsconfig,
            build,
            format,
        } => {
            setup_tracing(cli.verbose, false);
            let config = worker_config(&tsconfig, build, None)?;
            runtime()?.block_on(deps(config, format, cli.verbose))
        }
    }
}

/// Both sides are sequential; compiler work runs on the blocking pool.
fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn setup_tracing(verbose: bool, profile: bool) {
    use tracing_subscriber::EnvFilter;

    // stdout carries the worker protocol, so everything goes to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("typecheck_worker=debug,info")
        } else if profile {
            EnvFilter::new("typecheck_worker::engine=info,warn")
        } else {
            EnvFilter::new("warn")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// Worker process
// ---------------------------------------------------------------------------

async fn run_worker(config: WorkerConfig) -> Result<()> {
    limit_memory(config.memory_limit);
    tracing::info!(
        config = %config.config_path().display(),
        build = config.build,
        mode = ?config.output_mode(),
        pid = std::process::id(),
        "worker.started"
    );
    let session = tokio::task::spawn_blocking(move || Session::new(config))
        .await
        .context("failed to start session")?;
    serve(tokio::io::stdin(), tokio::io::stdout(), session).await
}

/// Cap the address space so a runaway check aborts the worker instead of the
/// machine. Allocation failure then aborts the process with `SIGABRT`.
#[cfg(unix)]
fn limit_memory(limit_mb: u64) {
    use nix::sys::resource::{Resource, getrlimit, setrlimit};

    let bytes = limit_mb.saturating_mul(1024 * 1024) as nix::libc::rlim_t;
    let result = getrlimit(Resource::RLIMIT_AS)
        .and_then(|(_, hard)| setrlimit(Resource::RLIMIT_AS, bytes.min(hard), hard));
    match result {
        Ok(()) => tracing::debug!(limit_mb, "worker.memory_limited"),
        Err(err) => tracing::warn!(limit_mb, %err, "failed to apply memory limit"),
    }
}

#[cfg(not(unix))]
fn limit_memory(limit_mb: u64) {
    tracing::debug!(limit_mb, "memory limit not supported on this platform");
}

// ---------------------------------------------------------------------------
// One-shot commands
// ---------------------------------------------------------------------------

/// Worker configuration for a tsconfig path: project defaults file first,
/// then command-line flags.
fn worker_config(tsconfig: &Path, build: bool, mode: Option<ModeArg>) -> Result<WorkerConfig> {
    let path = std::path::absolute(tsconfig)
        .with_context(|| format!("invalid path {}", tsconfig.display()))?;
    let mut config = WorkerConfig::new(&path);
    if let Some(dir) = path.parent() {
        config.apply_defaults(&ProjectDefaults::load(dir));
    }
    if build {
        config.build = true;
    }
    if let Some(mode) = mode {
        config.mode = Some(mode.into());
    }
    Ok(config)
}

fn spawn_worker(config: &WorkerConfig, verbose: bool) -> Result<WorkerHost> {
    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let mut args = vec![
        "worker".to_string(),
        "--config".to_string(),
        serde_json::to_string(config)?,
    ];
    if verbose {
        args.push("--verbose".to_string());
    }
    WorkerHost::spawn(&exe, &args, Pool::with_available_parallelism())
}

fn worker_failure(err: CallError, memory_limit: u64) -> anyhow::Error {
    match &err {
        CallError::WorkerExited(exit) => match exit.remediation(memory_limit) {
            Some(hint) => anyhow::anyhow!("{exit}\n{hint}"),
            None => anyhow::anyhow!("{exit}"),
        },
        _ => anyhow::Error::new(err).context("worker call failed"),
    }
}

fn base_dir(config: &WorkerConfig) -> PathBuf {
    config
        .config_path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Returns true when any error was reported.
async fn check(
    config: WorkerConfig,
    watching: bool,
    format: OutputFormat,
    verbose: bool,
) -> Result<bool> {
    let host = spawn_worker(&config, verbose)?;
    let issues = host
        .check_for_issues(FilesChange::default(), watching)
        .await
        .map_err(|err| worker_failure(err, config.memory_limit))?;

    print!("{}", output::format_issues(&issues, format, &base_dir(&config)));
    Ok(issues.iter().any(|issue| issue.is_error()))
}

async fn deps(config: WorkerConfig, format: OutputFormat, verbose: bool) -> Result<()> {
    let host = spawn_worker(&config, verbose)?;
    let dependencies = host
        .get_dependencies(FilesChange::default())
        .await
        .map_err(|err| worker_failure(err, config.memory_limit))?;

    print!("{}", output::format_dependencies(&dependencies, format));
    Ok(())
}
