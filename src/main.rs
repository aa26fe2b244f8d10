//! idle-worker - Daemon that runs a compute worker while nobody uses the machine.
//!
//! Starts the worker once every session has been idle for the configured
//! threshold, and stops it as soon as someone is back.

use anyhow::{Context, Result};
use clap::Parser;
use idle_worker::config::{Config, WorkerSpec};
use idle_worker::controller::DaemonController;
use idle_worker::idle::IdleEvaluator;
use idle_worker::poller::Poller;
use idle_worker::sampler::SessionSampler;
use idle_worker::session::{self, SessionSource};
use idle_worker::worker::SystemProcesses;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Idle-gated worker daemon.
///
/// Runs the configured worker only while every login session is idle.
#[derive(Parser, Debug)]
#[command(name = "idle-worker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable dry-run mode (log start/stop instead of doing it).
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run a single tick and exit (for cron-style scheduling).
    #[arg(long)]
    once: bool,

    /// Override the idle threshold, in minutes.
    #[arg(long)]
    idle_minutes: Option<u64>,

    /// Print each tick's session samples and verdict to stdout.
    #[arg(long)]
    print_samples: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level)?;

    info!("idle-worker v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    if args.dry_run {
        config.dry_run = true;
    }
    if let Some(minutes) = args.idle_minutes {
        config.idle_threshold_seconds = minutes.saturating_mul(60);
    }

    let spec = config.validate().context("Invalid configuration")?;
    log_config(&config, &spec);

    let sampler = SessionSampler::new(
        session::from_kind(config.session_source),
        config.dev_dir.clone(),
        config.activity_timestamp,
    );
    let evaluator = IdleEvaluator::new(config.idle_threshold());
    let controller = DaemonController::new(SystemProcesses::new(), spec, config.dry_run);

    let mut poller = Poller::new(sampler, evaluator, controller, config.poll_interval())
        .with_print_samples(args.print_samples);

    if args.once {
        return run_once(&mut poller).await;
    }

    poller.run(shutdown_signal()).await;
    Ok(())
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("idle_worker={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

fn log_config(config: &Config, spec: &WorkerSpec) {
    info!(
        "Idle time to run: {} minutes ({}s), checking every {}s (dry_run={})",
        config.idle_threshold_seconds / 60,
        config.idle_threshold_seconds,
        config.poll_interval_seconds,
        config.dry_run
    );
    info!(
        "Worker: {} {} in {} (process name {:?}, log {})",
        spec.binary.display(),
        spec.args.join(" "),
        spec.working_dir.display(),
        spec.process_name,
        spec.log_file.display()
    );
    debug!(
        "Sessions from {:?}, activity from {:?} under {}",
        config.session_source,
        config.activity_timestamp,
        config.dev_dir.display()
    );
}

/// Run exactly one tick.
async fn run_once<S: SessionSource>(
    poller: &mut Poller<S, SystemProcesses>,
) -> Result<()> {
    let report = poller.tick().await.context("Tick failed")?;
    info!(
        "Machine {} ({} session(s)): {:?}",
        report.verdict,
        report.samples.len(),
        report.outcome
    );
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => debug!("Received SIGINT"),
        _ = term.recv() => debug!("Received SIGTERM"),
    }
}
