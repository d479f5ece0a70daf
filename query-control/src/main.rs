//! Demo Query Control client (§6, §3 "Query Control": a client session that
//! submits a query and consumes its results). The real front end is out of
//! scope for this crate; this binary exercises the Master's client-facing
//! protocol end to end for manual testing.

use std::net::TcpStream;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cluster_proto::framing::{read_packet, write_packet, ProtocolError};
use cluster_proto::messages::{QueryAdmitted, QueryFilePath, QueryHandshakeAck, ReadData};
use cluster_proto::ClientOp;

#[derive(Debug, Parser)]
#[command(name = "query-control")]
struct Cli {
    /// Master's listening address, e.g. 127.0.0.1:9000.
    master_addr: String,

    /// Relative path (as known to the Workers' scripts directory) of the
    /// query script to run.
    query_path: PathBuf,

    /// Scheduling priority for this query; lower runs sooner under PRIORITY.
    #[arg(short, long, default_value_t = 0)]
    priority: u32,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut stream = match TcpStream::connect(&cli.master_addr) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("failed to connect to master at {}: {err}", cli.master_addr);
            return ExitCode::from(2);
        }
    };

    if let Err(err) = write_packet(&mut stream, ClientOp::QueryHandshake as u8, &[]) {
        eprintln!("failed to send query handshake: {err}");
        return ExitCode::from(2);
    }
    let client_id = match read_packet(&mut stream) {
        Ok((op, payload)) if ClientOp::from_u8(op) == Some(ClientOp::QueryHandshakeAck) => {
            match QueryHandshakeAck::decode(&payload) {
                Ok(ack) => ack.client_id,
                Err(err) => {
                    eprintln!("malformed query handshake ack: {err}");
                    return ExitCode::from(2);
                }
            }
        }
        Ok((op, _)) => {
            eprintln!("unexpected response to handshake: opcode {op}");
            return ExitCode::from(2);
        }
        Err(err) => {
            eprintln!("failed to read handshake ack: {err}");
            return ExitCode::from(2);
        }
    };
    tracing::info!(client_id, "handshake complete");

    let req = QueryFilePath {
        path: cli.query_path.to_string_lossy().into_owned(),
        priority: cli.priority,
    };
    if let Err(err) = write_packet(&mut stream, ClientOp::QueryFilePath as u8, &req.encode()) {
        eprintln!("failed to submit query: {err}");
        return ExitCode::from(2);
    }
    let query_id = match read_packet(&mut stream) {
        Ok((op, payload)) if ClientOp::from_u8(op) == Some(ClientOp::QueryAdmitted) => {
            match QueryAdmitted::decode(&payload) {
                Ok(ack) => ack.query_id,
                Err(err) => {
                    eprintln!("malformed query admission: {err}");
                    return ExitCode::from(2);
                }
            }
        }
        Ok((op, _)) => {
            eprintln!("unexpected response to submission: opcode {op}");
            return ExitCode::from(2);
        }
        Err(err) => {
            eprintln!("failed to read admission ack: {err}");
            return ExitCode::from(2);
        }
    };
    println!("query {query_id} admitted, awaiting results");

    loop {
        let (op_code, payload) = match read_packet(&mut stream) {
            Ok(pair) => pair,
            Err(ProtocolError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                println!("master closed the connection");
                return ExitCode::SUCCESS;
            }
            Err(err) => {
                eprintln!("malformed packet from master: {err}");
                return ExitCode::from(1);
            }
        };

        let Some(op) = ClientOp::from_u8(op_code) else {
            eprintln!("unknown opcode from master: {op_code}");
            return ExitCode::from(1);
        };

        match op {
            ClientOp::ReadData => match ReadData::decode(&payload) {
                Ok(msg) => {
                    println!("[{}] {} bytes", msg.file_tag, msg.data.len());
                }
                Err(err) => eprintln!("malformed read_data: {err}"),
            },
            ClientOp::MasterQueryEnd => {
                println!("query {query_id} completed");
                return ExitCode::SUCCESS;
            }
            ClientOp::MasterEndDisconnect => {
                let reason = cluster_proto::messages::MasterEndDisconnect::decode(&payload)
                    .map(|m| m.reason)
                    .unwrap_or_else(|_| "unknown reason".to_string());
                println!("query {query_id} canceled: {reason}");
                return ExitCode::FAILURE;
            }
            other => {
                eprintln!("unexpected opcode from master: {other:?}");
            }
        }
    }
}
