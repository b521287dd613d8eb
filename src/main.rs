//! qmd — entry point.
//!
//! Starts the worker pool against the default, disk-backed collaborators
//! (`InMemoryQueue`, `FsResultStore`, `WhitelistResolver`) and drains on
//! SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use qmd::config::Config;
use qmd::pool::Pool;
use qmd::queue_mem::InMemoryQueue;
use qmd::resolver_fs::WhitelistResolver;
use qmd::shutdown::OneShotSignal;
use qmd::store_fs::FsResultStore;

#[derive(Debug, Parser)]
#[command(name = "qmd")]
#[command(about = "Queue-fed worker pool for running whitelisted scripts as bounded child processes", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv); logs go to stderr.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the worker pool and run until SIGINT/SIGTERM.
    Serve {
        /// Path to the TOML config file. Defaults to
        /// `~/.config/qmd/config.toml` (platform config dir) if omitted.
        #[arg(long)]
        config: Option<String>,
    },
}

/// Priority chain for locating the config file when `--config` is not
/// given: CLI flag, then the platform config directory.
fn resolve_config_path(cli_config: Option<String>) -> Result<std::path::PathBuf> {
    if let Some(path) = cli_config {
        return Ok(std::path::PathBuf::from(path));
    }
    let base_dirs = directories::BaseDirs::new()
        .context("could not determine platform config directory; pass --config explicitly")?;
    Ok(base_dirs.config_dir().join("qmd").join("config.toml"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { config } => serve(resolve_config_path(config)?).await,
    }
}

async fn serve(config_path: std::path::PathBuf) -> Result<()> {
    let config = Config::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;

    tokio::fs::create_dir_all(&config.work_root)
        .await
        .with_context(|| format!("create work_root {}", config.work_root.display()))?;
    tokio::fs::create_dir_all(&config.result_root)
        .await
        .with_context(|| format!("create result_root {}", config.result_root.display()))?;

    let queue = Arc::new(InMemoryQueue::new());
    let result_store = Arc::new(FsResultStore::new(config.result_root.clone()));
    let resolver = Arc::new(
        WhitelistResolver::load(config.whitelist_path.clone(), config.script_dir.clone())
            .await
            .context("load whitelist")?,
    );

    let pool = Pool {
        workers: config.workers,
        queue,
        result_store,
        resolver,
        work_root: config.work_root.clone(),
        store_dir: config.store_dir.clone(),
        max_exec: Duration::from_secs(config.max_exec_seconds),
    };

    let shutdown = Arc::new(OneShotSignal::new());
    let shutdown_signals = shutdown.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        tracing::info!("shutdown signal received, draining pool");
        shutdown_signals.fire();
    });

    pool.run(shutdown).await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
