use std::net::TcpListener;
use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cluster_master::{server, MasterConfig, Scheduler};

/// Scheduler and dispatch server, the master leg of the cluster (§4.1).
#[derive(Debug, Parser)]
#[command(name = "masterd")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "./master.toml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    match panic::catch_unwind(run) {
        Ok(code) => code,
        Err(payload) => {
            tracing::error!(panic = %panic_message(&payload), "masterd panicked, exiting");
            ExitCode::from(2)
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Exit codes follow §6: `0` clean shutdown, `1` initialization failure,
/// `2` a panic caught in `main` (handled by the caller).
fn run() -> ExitCode {
    let cli = Cli::parse();

    let config = match MasterConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load config at {:?}: {err}", cli.config);
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_tracing().to_string())),
        )
        .init();

    let listener = match TcpListener::bind((config.ip.as_str(), config.port)) {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, ip = %config.ip, port = config.port, "failed to bind");
            return ExitCode::from(1);
        }
    };

    let scheduler = Arc::new(Scheduler::new(config.scheduling_algorithm, config.aging_interval()));

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        }) {
            tracing::warn!(%err, "failed to install signal handler, SIGINT/SIGTERM will terminate abruptly");
        }
    }

    if let Err(err) = server::run(listener, scheduler, shutdown) {
        tracing::error!(%err, "master server exited");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
