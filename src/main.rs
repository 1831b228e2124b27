mod classify;
mod config;
mod indicator;
mod monitor;
mod notify;
mod unit;

use clap::Parser;
use config::MonitorConfig;
use indicator::{FileIndicator, Indicator, LogIndicator};
use monitor::Supervisor;
use notify::{CommandNotifier, LogNotifier, Notifier};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};

/// Follows a restic systemd unit's journal and drives a backup status
/// indicator: shown while a job runs, shown briefly after it finishes,
/// hidden otherwise, with desktop notifications on start and finish.
#[derive(Parser, Debug)]
#[command(name = "resticwatch", version, about)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "resticwatch.toml")]
    config: PathBuf,

    /// Watch this service name instead of the configured one
    #[arg(short, long)]
    name: Option<String>,

    /// Resolve the watched unit, print it, and exit
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-line classification, timer decisions)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn configured_name(cli: &Cli, config: &MonitorConfig) -> String {
    cli.name
        .clone()
        .unwrap_or_else(|| config.service.name.clone())
}

fn build_surfaces(config: &MonitorConfig) -> (Box<dyn Indicator>, Box<dyn Notifier>) {
    let indicator: Box<dyn Indicator> = match &config.indicator.status_file {
        Some(path) => Box::new(FileIndicator::new(path.clone())),
        None => Box::new(LogIndicator),
    };
    let notifier: Box<dyn Notifier> = if config.notify.enabled {
        Box::new(CommandNotifier::new(config.notify.command.clone()))
    } else {
        Box::new(LogNotifier)
    };
    (indicator, notifier)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = match MonitorConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "cannot load configuration");
            std::process::exit(1);
        }
    };

    let target = unit::resolve(&configured_name(&cli, &config));
    if cli.dry_run {
        println!("{}", target.unit);
        return;
    }

    tracing::info!("resticwatch starting");
    let (indicator, notifier) = build_surfaces(&config);
    let supervisor = Supervisor::new(
        config.journal.clone(),
        Duration::from_millis(config.indicator.hide_delay_ms),
        indicator,
        notifier,
    );

    if supervisor.restart(target).is_err() {
        // Stay alive: a SIGHUP reconfiguration can bring the monitor back.
        tracing::warn!("monitor not started, waiting for reconfiguration");
    }

    let (mut hangup, mut terminate) =
        match (signal(SignalKind::hangup()), signal(SignalKind::terminate())) {
            (Ok(hangup), Ok(terminate)) => (hangup, terminate),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "cannot install signal handlers");
                supervisor.stop();
                std::process::exit(1);
            }
        };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = terminate.recv() => break,
            _ = hangup.recv() => reload(&cli, &supervisor),
        }
    }

    supervisor.stop();
    tracing::info!("resticwatch shut down");
}

/// SIGHUP: re-read the config and re-target the monitor. A broken config
/// keeps the current session running.
fn reload(cli: &Cli, supervisor: &Supervisor) {
    let config = match MonitorConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "reload failed, keeping current target");
            return;
        }
    };
    let target = unit::resolve(&configured_name(cli, &config));
    tracing::info!(unit = %target.unit, "reconfigured, restarting monitor");
    if supervisor.restart(target).is_err() {
        tracing::warn!("monitor not started, waiting for reconfiguration");
    }
}
