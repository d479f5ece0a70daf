//! Master-listener task: receives `ASSIGN_QUERY` / `EJECT_QUERY` /
//! `END_QUERY` / `END_WORKER`, grounded on
//! `original_source/worker/src/worker_listener.c`.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use cluster_proto::framing::{read_packet, write_packet, ProtocolError};
use cluster_proto::messages::{AssignQuery, EjectQuery, EjectRes};
use cluster_proto::WorkerOp;
use tracing::{info, warn};

use crate::state::{CurrentQuery, Worker};

pub fn run(worker: Arc<Worker>, mut read_stream: TcpStream, master: Arc<Mutex<TcpStream>>) {
    loop {
        let (op_code, payload) = match read_packet(&mut read_stream) {
            Ok(pair) => pair,
            Err(ProtocolError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                info!("master disconnected");
                stop(&worker);
                return;
            }
            Err(err) => {
                warn!(%err, "malformed packet from master, stopping listener");
                stop(&worker);
                return;
            }
        };

        let Some(op) = WorkerOp::from_u8(op_code) else {
            warn!(op_code, "unknown worker opcode from master");
            continue;
        };

        match op {
            WorkerOp::AssignQuery => match AssignQuery::decode(&payload) {
                Ok(req) => assign_query(&worker, req),
                Err(err) => warn!(%err, "malformed ASSIGN_QUERY"),
            },
            WorkerOp::EjectQuery => match EjectQuery::decode(&payload) {
                Ok(req) => eject_query(&worker, &master, req.query_id),
                Err(err) => warn!(%err, "malformed EJECT_QUERY"),
            },
            WorkerOp::EndQuery | WorkerOp::EndWorker => {
                info!(?op, "shutdown requested by master");
                stop(&worker);
                return;
            }
            other => warn!(?other, "unexpected opcode on the master->worker channel"),
        }
    }
}

fn assign_query(worker: &Worker, req: AssignQuery) {
    let mut core = worker.lock();
    core.memory.bind_query(Some(req.query_id));
    let query_id = req.query_id;
    core.current_query = Some(CurrentQuery {
        query_id: req.query_id,
        program_counter: req.program_counter,
        relative_path: req.relative_path,
    });
    core.ejection_requested = false;
    info!(query_id, "query assigned");
    worker.condvar().notify_all();
}

/// Mirrors `eject_query` in the original listener: if the executor is
/// mid-run, defer to its `ejection_requested` checkpoints; otherwise —
/// the query is only READY, not currently executing — the listener itself
/// performs the eviction synchronously, since no executor pass will ever
/// observe the flag for a query it hasn't started.
fn eject_query(worker: &Worker, master: &Mutex<TcpStream>, query_id: u32) {
    let mut core = worker.lock();
    let Some(current) = core.current_query.as_ref() else {
        return;
    };
    if current.query_id != query_id {
        return;
    }
    if core.is_executing {
        core.ejection_requested = true;
        return;
    }

    let program_counter = current.program_counter;
    let _ = core.memory.flush_all_dirty(&mut core.storage);
    core.memory.bind_query(None);
    core.current_query = None;
    drop(core);

    let res = EjectRes { query_id, program_counter };
    send_to_master(master, WorkerOp::EjectRes, &res.encode());
    info!(query_id, program_counter, "query evicted in READY state");
}

fn stop(worker: &Worker) {
    let mut core = worker.lock();
    core.should_stop = true;
    worker.condvar().notify_all();
}

pub(crate) fn send_to_master(master: &Mutex<TcpStream>, op: WorkerOp, payload: &[u8]) {
    let mut stream = master.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Err(err) = write_packet(&mut *stream, op as u8, payload) {
        warn!(%err, ?op, "failed to send to master");
    }
}
</content>
