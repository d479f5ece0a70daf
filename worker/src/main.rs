use std::net::{Shutdown, TcpStream};
use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cluster_proto::framing::{read_packet, write_packet};
use cluster_proto::messages::{WorkerHandshakeReq, WorkerHandshakeRes};
use cluster_proto::WorkerOp;
use cluster_worker::memory::MemoryManager;
use cluster_worker::state::Worker;
use cluster_worker::storage_client::StorageClient;
use cluster_worker::{executor, listener, WorkerConfig};

/// Paged-memory query executor, the worker leg of the cluster (§4.2).
#[derive(Debug, Parser)]
#[command(name = "workerd")]
struct Cli {
    /// Worker id announced at both the Storage and Master handshakes.
    worker_id: u32,

    /// Path to the TOML config file.
    #[arg(short, long, default_value = "./worker.toml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    match panic::catch_unwind(run) {
        Ok(code) => code,
        Err(payload) => {
            tracing::error!(panic = %panic_message(&payload), "workerd panicked, exiting");
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

    let config = match WorkerConfig::load(&cli.config) {
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

    let worker_id = cli.worker_id;

    let (storage, block_size) =
        match StorageClient::connect(&config.storage_ip, config.storage_port, worker_id) {
            Ok(pair) => pair,
            Err(err) => {
                tracing::error!(%err, "failed to connect to storage");
                return ExitCode::from(1);
            }
        };

    let memory = MemoryManager::new(
        config.memory_size,
        block_size as usize,
        Duration::from_millis(config.memory_delay_ms),
        config.replacement_algorithm,
    );

    let mut master_stream = match TcpStream::connect((config.master_ip.as_str(), config.master_port)) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::error!(%err, ip = %config.master_ip, port = config.master_port, "failed to connect to master");
            return ExitCode::from(1);
        }
    };

    let handshake = WorkerHandshakeReq { worker_id: worker_id.to_string() };
    if let Err(err) = write_packet(&mut master_stream, WorkerOp::WorkerHandshakeReq as u8, &handshake.encode()) {
        tracing::error!(%err, "failed to send handshake to master");
        return ExitCode::from(1);
    }
    match read_packet(&mut master_stream) {
        Ok((op, payload)) if WorkerOp::from_u8(op) == Some(WorkerOp::WorkerHandshakeRes) => {
            if WorkerHandshakeRes::decode(&payload).is_err() {
                tracing::error!("malformed handshake response from master");
                return ExitCode::from(1);
            }
        }
        Ok((op, _)) => {
            tracing::error!(op, "unexpected response to handshake");
            return ExitCode::from(1);
        }
        Err(err) => {
            tracing::error!(%err, "failed to read handshake response from master");
            return ExitCode::from(1);
        }
    }
    tracing::info!(worker_id, "handshake with master complete");

    let read_stream = match master_stream.try_clone() {
        Ok(stream) => stream,
        Err(err) => {
            tracing::error!(%err, "failed to clone master connection");
            return ExitCode::from(1);
        }
    };
    let shutdown_stream = match master_stream.try_clone() {
        Ok(stream) => stream,
        Err(err) => {
            tracing::error!(%err, "failed to clone master connection");
            return ExitCode::from(1);
        }
    };
    let master = Arc::new(Mutex::new(master_stream));
    let worker = Arc::new(Worker::new(worker_id, config.scripts_path.clone(), memory, storage));

    // SIGINT/SIGTERM: wake the condvar-waiting executor and break the
    // listener out of its blocking read by shutting down its socket, so
    // both threads unwind and `run` can drain them before returning (§6
    // "Exit codes": clean shutdown drains in-flight work).
    {
        let worker = worker.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received");
            {
                let mut core = worker.lock();
                core.should_stop = true;
            }
            worker.condvar().notify_all();
            let _ = shutdown_stream.shutdown(Shutdown::Both);
        }) {
            tracing::warn!(%err, "failed to install signal handler, SIGINT/SIGTERM will terminate abruptly");
        }
    }

    let listener_handle = {
        let worker = worker.clone();
        let master = master.clone();
        thread::spawn(move || listener::run(worker, read_stream, master))
    };

    executor::run(worker, master);

    if let Err(err) = listener_handle.join() {
        tracing::error!(?err, "master listener thread panicked");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
