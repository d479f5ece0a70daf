//! TCP accept loop and per-worker-connection dispatch over `StorageOp`,
//! grounded on `original_source/storage/src/server/server.c` (one thread per
//! accepted connection, a switch over the incoming op code).

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cluster_proto::framing::{read_packet, write_packet, ProtocolError};
use cluster_proto::messages::{
    BlockReadReq, BlockReadRes, BlockWriteReq, FileTagReq, FileTruncateReq, GetBlockSizeRes,
    SendIdReq, StatusRes, StorageErrorMsg, TagCreateReq,
};
use cluster_proto::{StorageOp, StorageStatus};
use tracing::{error, info, info_span, warn};

use crate::engine::StorageEngine;
use crate::error::StorageError;

/// How often the accept loop polls the non-blocking listener for a pending
/// connection while also checking `shutdown` (§6 "Exit codes": clean
/// shutdown drains in-flight connections before returning).
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(listener: TcpListener, engine: Arc<StorageEngine>, shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    info!(local_addr = ?listener.local_addr()?, "storage server listening");
    listener.set_nonblocking(true)?;

    let connections: Mutex<Vec<thread::JoinHandle<()>>> = Mutex::new(Vec::new());

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                let engine = engine.clone();
                let handle = thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, engine) {
                        warn!(%err, "worker connection ended");
                    }
                });
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

fn handle_connection(mut stream: TcpStream, engine: Arc<StorageEngine>) -> std::io::Result<()> {
    let peer = stream.peer_addr().ok();
    let span = info_span!("storage_connection", ?peer);
    let _entered = span.enter();
    info!("worker connected");

    loop {
        let (op_code, payload) = match read_packet(&mut stream) {
            Ok(pair) => pair,
            Err(ProtocolError::Io(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                info!("worker disconnected");
                return Ok(());
            }
            Err(err) => {
                error!(%err, "malformed packet, closing connection");
                return Ok(());
            }
        };

        let Some(op) = StorageOp::from_u8(op_code) else {
            error!(op_code, "unknown storage opcode, closing connection");
            return Ok(());
        };

        if let Err(err) = dispatch(&mut stream, &engine, op, &payload) {
            error!(%err, ?op, "failed to service request");
            return Ok(());
        }
    }
}

fn dispatch(
    stream: &mut TcpStream,
    engine: &StorageEngine,
    op: StorageOp,
    payload: &[u8],
) -> std::io::Result<()> {
    match op {
        StorageOp::SendIdReq => {
            let req = SendIdReq::decode(payload).map_err(protocol_to_io)?;
            info!(worker_id = req.worker_id, "worker identified itself");
            send_result(stream, req.worker_id, StorageOp::SendIdRes, Ok(()))
        }

        StorageOp::GetBlockSizeReq => {
            let res = GetBlockSizeRes {
                block_size: engine.block_size() as u16,
            };
            write_packet(stream, StorageOp::GetBlockSizeRes as u8, &res.encode())
                .map_err(protocol_to_io)
        }

        StorageOp::FileCreateReq => {
            let req = FileTagReq::decode(payload).map_err(protocol_to_io)?;
            let result = engine.create(&req.file, &req.tag);
            send_result(stream, req.worker_id, StorageOp::FileCreateRes, result)
        }

        StorageOp::FileTruncateReq => {
            let req = FileTruncateReq::decode(payload).map_err(protocol_to_io)?;
            let worker_id = req.worker_id;
            let result = engine.truncate(&req.file, &req.tag, req.new_size as u64);
            send_result(stream, worker_id, StorageOp::FileTruncateRes, result)
        }

        StorageOp::TagCreateReq => {
            let req = TagCreateReq::decode(payload).map_err(protocol_to_io)?;
            let worker_id = req.worker_id;
            let result = engine.tag(&req.src_file, &req.src_tag, &req.dst_file, &req.dst_tag);
            send_result(stream, worker_id, StorageOp::TagCreateRes, result)
        }

        StorageOp::TagCommitReq => {
            let req = FileTagReq::decode(payload).map_err(protocol_to_io)?;
            let result = engine.commit(&req.file, &req.tag);
            send_result(stream, req.worker_id, StorageOp::TagCommitRes, result)
        }

        StorageOp::TagDeleteReq => {
            let req = FileTagReq::decode(payload).map_err(protocol_to_io)?;
            let result = engine.delete(&req.file, &req.tag);
            send_result(stream, req.worker_id, StorageOp::TagDeleteRes, result)
        }

        StorageOp::BlockReadReq => {
            let req = BlockReadReq::decode(payload).map_err(protocol_to_io)?;
            match engine.read_block(&req.file, &req.tag, req.block_number) {
                Ok(data) => {
                    let res = BlockReadRes { data };
                    write_packet(stream, StorageOp::BlockReadRes as u8, &res.encode())
                        .map_err(protocol_to_io)
                }
                Err(err) => send_read_error(stream, req.worker_id, err),
            }
        }

        StorageOp::BlockWriteReq => {
            let req = BlockWriteReq::decode(payload).map_err(protocol_to_io)?;
            let worker_id = req.worker_id;
            let result = engine.write_block(&req.file, &req.tag, req.block_number, &req.data);
            send_result(stream, worker_id, StorageOp::BlockWriteRes, result)
        }

        StorageOp::SendIdRes
        | StorageOp::GetBlockSizeRes
        | StorageOp::FileCreateRes
        | StorageOp::FileTruncateRes
        | StorageOp::TagCreateRes
        | StorageOp::TagCommitRes
        | StorageOp::TagDeleteRes
        | StorageOp::BlockReadRes
        | StorageOp::BlockWriteRes
        | StorageOp::StorageError => {
            warn!(?op, "received a response opcode on the request path, ignoring");
            Ok(())
        }
    }
}

/// `BLOCK_READ_REQ`'s only response shapes in §6 are `RES(u32 size, bytes)`
/// on success and `STORAGE_ERROR` on failure — there is no short `(i8
/// status)` form for this opcode, unlike every other request. Domain errors
/// (`FILE_TAG_MISSING`, `READ_OUT_OF_BOUNDS`, ...) therefore go out as
/// `STORAGE_ERROR` too, not as a `StatusRes` mislabeled `BLOCK_READ_RES`.
fn send_read_error(stream: &mut TcpStream, worker_id: u32, err: StorageError) -> std::io::Result<()> {
    error!(%err, worker_id, "block read failed");
    let res = StorageErrorMsg {
        query_id: worker_id,
        message: err.to_string(),
    };
    write_packet(stream, StorageOp::StorageError as u8, &res.encode())
}

/// Encodes `result` as the paired `RES(i8 status)` for one of the five
/// enumerated domain errors, or as `STORAGE_ERROR` for anything else (a
/// corrupt on-disk structure, an I/O failure). §6 keys `STORAGE_ERROR` on
/// `query_id`, which this layer never sees — `worker_id` stands in, matching
/// the identifier every other Worker<->Storage message carries.
fn send_result(
    stream: &mut TcpStream,
    worker_id: u32,
    res_op: StorageOp,
    result: Result<(), StorageError>,
) -> std::io::Result<()> {
    match result {
        Ok(()) => {
            let res = StatusRes { status: StorageStatus::Success };
            write_packet(stream, res_op as u8, &res.encode())
        }
        Err(err) => match err.to_status() {
            Some(status) => {
                let res = StatusRes { status };
                write_packet(stream, res_op as u8, &res.encode())
            }
            None => {
                error!(%err, worker_id, "unmapped storage error");
                let res = StorageErrorMsg {
                    query_id: worker_id,
                    message: err.to_string(),
                };
                write_packet(stream, StorageOp::StorageError as u8, &res.encode())
            }
        },
    }
}

fn protocol_to_io(err: cluster_proto::ProtocolError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, err)
}
