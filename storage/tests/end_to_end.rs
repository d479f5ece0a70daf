//! Drives `storaged`'s dispatch loop over a real loopback TCP socket,
//! exercising the wire protocol end to end rather than calling the engine
//! directly.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use cluster_proto::framing::{read_packet, write_packet};
use cluster_proto::messages::{
    BlockReadReq, BlockReadRes, BlockWriteReq, FileTagReq, FileTruncateReq, GetBlockSizeRes,
    SendIdReq, StatusRes, StorageErrorMsg,
};
use cluster_proto::StorageOp;
use cluster_storage::config::LogLevel;
use cluster_storage::{StorageConfig, StorageEngine};

fn spawn_server() -> (TcpStream, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("superblock.config"),
        "FS_SIZE=4096\nBLOCK_SIZE=256\n",
    )
    .unwrap();

    let config = StorageConfig {
        ip: "127.0.0.1".into(),
        port: 0,
        fresh_start: true,
        mount_point: dir.path().to_path_buf(),
        operation_delay_ms: 0,
        block_access_delay_ms: 0,
        log_level: LogLevel::Info,
    };
    let engine = Arc::new(StorageEngine::fresh_start(&config).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));
    std::thread::spawn(move || {
        let _ = cluster_storage::server::run(listener, engine, shutdown);
    });

    let client = TcpStream::connect(addr).unwrap();
    (client, dir)
}

#[test]
fn create_write_read_commit_over_the_wire() {
    let (mut client, _dir) = spawn_server();

    let req = SendIdReq { worker_id: 1 };
    write_packet(&mut client, StorageOp::SendIdReq as u8, &req.encode()).unwrap();
    let (op, payload) = read_packet(&mut client).unwrap();
    assert_eq!(op, StorageOp::SendIdRes as u8);
    assert!(StatusRes::decode(&payload).unwrap().status.is_success());

    write_packet(&mut client, StorageOp::GetBlockSizeReq as u8, &[]).unwrap();
    let (op, payload) = read_packet(&mut client).unwrap();
    assert_eq!(op, StorageOp::GetBlockSizeRes as u8);
    assert_eq!(GetBlockSizeRes::decode(&payload).unwrap().block_size, 256);

    let req = FileTagReq {
        worker_id: 1,
        file: "program".into(),
        tag: "v1".into(),
    };
    write_packet(&mut client, StorageOp::FileCreateReq as u8, &req.encode()).unwrap();
    let (op, payload) = read_packet(&mut client).unwrap();
    assert_eq!(op, StorageOp::FileCreateRes as u8);
    assert!(StatusRes::decode(&payload).unwrap().status.is_success());

    let req = FileTruncateReq {
        worker_id: 1,
        file: "program".into(),
        tag: "v1".into(),
        new_size: 256,
    };
    write_packet(&mut client, StorageOp::FileTruncateReq as u8, &req.encode()).unwrap();
    let (op, payload) = read_packet(&mut client).unwrap();
    assert_eq!(op, StorageOp::FileTruncateRes as u8);
    assert!(StatusRes::decode(&payload).unwrap().status.is_success());

    let req = BlockWriteReq {
        worker_id: 1,
        file: "program".into(),
        tag: "v1".into(),
        block_number: 0,
        data: b"print hello".to_vec(),
    };
    write_packet(&mut client, StorageOp::BlockWriteReq as u8, &req.encode()).unwrap();
    let (op, payload) = read_packet(&mut client).unwrap();
    assert_eq!(op, StorageOp::BlockWriteRes as u8);
    assert!(StatusRes::decode(&payload).unwrap().status.is_success());

    let req = BlockReadReq {
        worker_id: 1,
        file: "program".into(),
        tag: "v1".into(),
        block_number: 0,
    };
    write_packet(&mut client, StorageOp::BlockReadReq as u8, &req.encode()).unwrap();
    let (op, payload) = read_packet(&mut client).unwrap();
    assert_eq!(op, StorageOp::BlockReadRes as u8);
    let data = BlockReadRes::decode(&payload).unwrap().data;
    assert_eq!(&data[..11], b"print hello");

    let req = FileTagReq {
        worker_id: 1,
        file: "program".into(),
        tag: "v1".into(),
    };
    write_packet(&mut client, StorageOp::TagCommitReq as u8, &req.encode()).unwrap();
    let (op, payload) = read_packet(&mut client).unwrap();
    assert_eq!(op, StorageOp::TagCommitRes as u8);
    assert!(StatusRes::decode(&payload).unwrap().status.is_success());

    // A write against a committed tag now comes back as a domain failure.
    let req = BlockWriteReq {
        worker_id: 1,
        file: "program".into(),
        tag: "v1".into(),
        block_number: 0,
        data: b"nope".to_vec(),
    };
    write_packet(&mut client, StorageOp::BlockWriteReq as u8, &req.encode()).unwrap();
    let (op, payload) = read_packet(&mut client).unwrap();
    assert_eq!(op, StorageOp::BlockWriteRes as u8);
    assert!(!StatusRes::decode(&payload).unwrap().status.is_success());
}

#[test]
fn unknown_file_tag_is_reported_as_file_tag_missing() {
    let (mut client, _dir) = spawn_server();

    let req = BlockReadReq {
        worker_id: 1,
        file: "ghost".into(),
        tag: "v1".into(),
        block_number: 0,
    };
    write_packet(&mut client, StorageOp::BlockReadReq as u8, &req.encode()).unwrap();
    let (op, payload) = read_packet(&mut client).unwrap();

    // BLOCK_READ_REQ's only response shapes are RES(u32 size, bytes) on
    // success and STORAGE_ERROR on failure (§6) — there is no short status
    // form for this opcode, so a real worker (`StorageClient::read_block`)
    // only ever decodes a failure this way.
    assert_eq!(op, StorageOp::StorageError as u8);
    let err = StorageErrorMsg::decode(&payload).unwrap();
    assert!(err.message.contains("not found"));
}
