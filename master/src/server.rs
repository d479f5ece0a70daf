//! TCP accept loop and per-connection dispatch, grounded on
//! `original_source/master/src/main.c` (one thread per accepted socket,
//! the same listening port serving both Query Control and Worker peers)
//! plus the aging loop in `original_source/master/src/aging.c`.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cluster_proto::framing::{read_packet, write_packet, ProtocolError};
use cluster_proto::messages::{
    EjectRes, EndQuery, QueryAdmitted, QueryFilePath, QueryHandshakeAck, ReadData, ReadMsg,
    WorkerHandshakeReq, WorkerHandshakeRes,
};
use cluster_proto::{ClientOp, WorkerOp};
use tracing::{error, info, info_span, warn};

use crate::config::SchedulingAlgorithm;
use crate::scheduler::Scheduler;

/// How often the accept loop polls the non-blocking listener for a pending
/// connection while also checking `shutdown` (§6 "Exit codes": clean
/// shutdown drains in-flight connections before returning).
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(listener: TcpListener, scheduler: Arc<Scheduler>, shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    info!(local_addr = ?listener.local_addr()?, "master listening");
    listener.set_nonblocking(true)?;

    if scheduler.algorithm() == SchedulingAlgorithm::Priority {
        let scheduler = scheduler.clone();
        let interval = scheduler.aging_interval() / 10;
        let shutdown = shutdown.clone();
        thread::spawn(move || run_aging_loop(scheduler, interval, shutdown));
    }

    let connections: Mutex<Vec<thread::JoinHandle<()>>> = Mutex::new(Vec::new());

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                let scheduler = scheduler.clone();
                let handle = thread::spawn(move || handle_connection(stream, scheduler));
                connections.lock().unwrap_or_else(|p| p.into_inner()).push(handle);
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => return Err(err),
        }
    }

    info!("shutdown requested, draining in-flight connections");
    let handles = std::mem::take(&mut *connections.lock().unwrap_or_else(|p| p.into_inner()));
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

/// Wakes up ten times per `aging_interval` to sample elapsed ready-time
/// (§4.1 Aging: "sampled at `aging_interval/10`").
fn run_aging_loop(scheduler: Arc<Scheduler>, sample_interval: Duration, shutdown: Arc<AtomicBool>) {
    let sample_interval = sample_interval.max(Duration::from_millis(1));
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(sample_interval);
        scheduler.aging_tick();
    }
}

/// The first opcode read on a freshly accepted socket decides whether it is
/// a Query Control or a Worker connection; every later packet on that same
/// socket is assumed to be the same kind (§4.1, §6).
fn handle_connection(mut stream: TcpStream, scheduler: Arc<Scheduler>) {
    let peer = stream.peer_addr().ok();
    let span = info_span!("master_connection", ?peer);
    let _entered = span.enter();

    let (op_code, payload) = match read_packet(&mut stream) {
        Ok(pair) => pair,
        Err(err) => {
            warn!(%err, "connection closed before a handshake arrived");
            return;
        }
    };

    if let Some(op) = ClientOp::from_u8(op_code) {
        if op != ClientOp::QueryHandshake {
            warn!(?op, "first packet on a new connection was not a query handshake");
            return;
        }
        handle_query_control(stream, &payload, scheduler);
        return;
    }

    if let Some(op) = WorkerOp::from_u8(op_code) {
        if op != WorkerOp::WorkerHandshakeReq {
            warn!(?op, "first packet on a new connection was not a worker handshake");
            return;
        }
        handle_worker(stream, &payload, scheduler);
        return;
    }

    warn!(op_code, "unrecognized opcode on a new connection");
}

/// Services one Query Control session end to end: handshake, then
/// `QUERY_FILE_PATH` submissions and `READ_DATA` forwards until the
/// connection drops, at which point any query it still owns is canceled
/// (§4.1 `client_disconnected`).
fn handle_query_control(mut stream: TcpStream, _handshake_payload: &[u8], scheduler: Arc<Scheduler>) {
    let client_id = stream.peer_addr().map(|a| a.port() as u32).unwrap_or(0);
    let ack = QueryHandshakeAck { client_id };
    if write_packet(&mut stream, ClientOp::QueryHandshakeAck as u8, &ack.encode()).is_err() {
        warn!("failed to ack query handshake");
        return;
    }

    let connection = match stream.try_clone() {
        Ok(clone) => Arc::new(Mutex::new(clone)),
        Err(err) => {
            error!(%err, "failed to clone query control connection");
            return;
        }
    };

    let mut owned_query_id = None;

    loop {
        let (op_code, payload) = match read_packet(&mut stream) {
            Ok(pair) => pair,
            Err(ProtocolError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                info!("query control disconnected");
                break;
            }
            Err(err) => {
                warn!(%err, "malformed packet from query control, closing");
                break;
            }
        };

        let Some(op) = ClientOp::from_u8(op_code) else {
            warn!(op_code, "unknown client opcode, closing");
            break;
        };

        match op {
            ClientOp::QueryFilePath => {
                let Ok(req) = QueryFilePath::decode(&payload) else {
                    warn!("malformed query_file_path, closing");
                    break;
                };
                let query_id = scheduler.submit_query(req.path, req.priority, connection.clone());
                owned_query_id = Some(query_id);
                let ack = QueryAdmitted { query_id };
                if write_packet(&mut stream, ClientOp::QueryAdmitted as u8, &ack.encode()).is_err() {
                    warn!(query_id, "failed to ack query admission");
                    break;
                }
            }
            _ => {
                warn!(?op, "unexpected opcode from query control, ignoring");
            }
        }
    }

    if let Some(query_id) = owned_query_id {
        scheduler.client_disconnected(query_id);
    }
}

/// Services one Worker connection end to end: handshake, then
/// `EJECT_RES`/`END_QUERY`/`READ_MSG`/`END_WORKER` until the connection
/// drops, at which point `worker_disconnected` cancels anything it held
/// (§4.1 `worker_disconnected`).
fn handle_worker(mut stream: TcpStream, handshake_payload: &[u8], scheduler: Arc<Scheduler>) {
    let handshake = match WorkerHandshakeReq::decode(handshake_payload) {
        Ok(req) => req,
        Err(err) => {
            warn!(%err, "malformed worker handshake");
            return;
        }
    };
    let Ok(worker_id) = handshake.worker_id.parse::<u32>() else {
        warn!(worker_id = %handshake.worker_id, "worker handshake carried a non-numeric id");
        return;
    };

    let ack = WorkerHandshakeRes;
    if write_packet(&mut stream, WorkerOp::WorkerHandshakeRes as u8, &ack.encode()).is_err() {
        warn!(worker_id, "failed to ack worker handshake");
        return;
    }

    let connection = match stream.try_clone() {
        Ok(clone) => Arc::new(Mutex::new(clone)),
        Err(err) => {
            error!(%err, worker_id, "failed to clone worker connection");
            return;
        }
    };
    scheduler.worker_connected(worker_id, connection);

    loop {
        let (op_code, payload) = match read_packet(&mut stream) {
            Ok(pair) => pair,
            Err(ProtocolError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                info!(worker_id, "worker disconnected");
                break;
            }
            Err(err) => {
                warn!(%err, worker_id, "malformed packet from worker, closing");
                break;
            }
        };

        let Some(op) = WorkerOp::from_u8(op_code) else {
            warn!(op_code, worker_id, "unknown worker opcode, closing");
            break;
        };

        match op {
            WorkerOp::EjectRes => {
                let Ok(res) = EjectRes::decode(&payload) else {
                    warn!(worker_id, "malformed eject_res, closing");
                    break;
                };
                scheduler.handle_eject_res(worker_id, res.query_id, res.program_counter);
            }
            WorkerOp::EndQuery => {
                let Ok(res) = EndQuery::decode(&payload) else {
                    warn!(worker_id, "malformed end_query, closing");
                    break;
                };
                scheduler.end_query(worker_id, res.query_id);
            }
            WorkerOp::ReadMsg => {
                let Ok(msg) = ReadMsg::decode(&payload) else {
                    warn!(worker_id, "malformed read_msg, closing");
                    break;
                };
                forward_read(&scheduler, msg);
            }
            WorkerOp::EndWorker => {
                info!(worker_id, "worker announced shutdown");
                break;
            }
            _ => {
                warn!(?op, worker_id, "unexpected opcode from worker, ignoring");
            }
        }
    }

    scheduler.worker_disconnected(worker_id);
}

/// Forwards a Worker's `READ_MSG` to the Query Control that owns the query,
/// as `READ_DATA` (§4.1 `manage_read_message_from_worker`).
fn forward_read(scheduler: &Scheduler, msg: ReadMsg) {
    let Some(client_handle) = scheduler.queries.get_client_handle(msg.query_id) else {
        warn!(query_id = msg.query_id, "read_msg for an unknown query, dropping");
        return;
    };
    let payload = ReadData {
        data: msg.data,
        file_tag: format!("{}:{}", msg.file, msg.tag),
    };
    let mut stream = client_handle.lock().unwrap_or_else(|p| p.into_inner());
    if let Err(err) = write_packet(&mut *stream, ClientOp::ReadData as u8, &payload.encode()) {
        warn!(%err, query_id = msg.query_id, "failed to forward read data to query control");
    }
}
