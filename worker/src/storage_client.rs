//! TCP client for the Worker <-> Storage protocol, grounded on
//! `original_source/worker/src/storage_connection/storage_connection.c`
//! (handshake, then one request/response round trip per instruction).

use std::net::TcpStream;

use cluster_proto::framing::{read_packet, write_packet};
use cluster_proto::messages::{
    BlockReadReq, BlockReadRes, BlockWriteReq, FileTagReq, FileTruncateReq, GetBlockSizeRes,
    SendIdReq, StatusRes, StorageErrorMsg, TagCreateReq,
};
use cluster_proto::{StorageOp, StorageStatus};
use tracing::info;

use crate::error::{Result, WorkerError};
use crate::memory::BlockIo;

pub struct StorageClient {
    stream: TcpStream,
    worker_id: u32,
}

impl StorageClient {
    /// Connects, sends `SEND_ID_REQ`, then `GET_BLOCK_SIZE_REQ`, returning
    /// the client together with the block size Storage reports — the real
    /// page size for this worker's memory manager (§6).
    pub fn connect(ip: &str, port: u16, worker_id: u32) -> Result<(Self, u16)> {
        let stream = TcpStream::connect((ip, port))?;
        let mut client = Self { stream, worker_id };

        let req = SendIdReq { worker_id };
        write_packet(&mut client.stream, StorageOp::SendIdReq as u8, &req.encode())?;
        client.expect_status("", "", StorageOp::SendIdRes)?;

        write_packet(&mut client.stream, StorageOp::GetBlockSizeReq as u8, &[])?;
        let (op, payload) = read_packet(&mut client.stream)?;
        let Some(StorageOp::GetBlockSizeRes) = StorageOp::from_u8(op) else {
            return Err(WorkerError::Handshake("storage did not answer GET_BLOCK_SIZE_REQ".to_string()));
        };
        let res = GetBlockSizeRes::decode(&payload)?;

        info!(worker_id, block_size = res.block_size, "storage handshake complete");
        Ok((client, res.block_size))
    }

    pub fn create(&mut self, file: &str, tag: &str) -> Result<()> {
        let req = FileTagReq {
            worker_id: self.worker_id,
            file: file.to_string(),
            tag: tag.to_string(),
        };
        write_packet(&mut self.stream, StorageOp::FileCreateReq as u8, &req.encode())?;
        self.expect_status(file, tag, StorageOp::FileCreateRes)
    }

    pub fn truncate(&mut self, file: &str, tag: &str, new_size: u32) -> Result<()> {
        let req = FileTruncateReq {
            worker_id: self.worker_id,
            file: file.to_string(),
            tag: tag.to_string(),
            new_size,
        };
        write_packet(&mut self.stream, StorageOp::FileTruncateReq as u8, &req.encode())?;
        self.expect_status(file, tag, StorageOp::FileTruncateRes)
    }

    pub fn tag(&mut self, src_file: &str, src_tag: &str, dst_file: &str, dst_tag: &str) -> Result<()> {
        let req = TagCreateReq {
            worker_id: self.worker_id,
            src_file: src_file.to_string(),
            src_tag: src_tag.to_string(),
            dst_file: dst_file.to_string(),
            dst_tag: dst_tag.to_string(),
        };
        write_packet(&mut self.stream, StorageOp::TagCreateReq as u8, &req.encode())?;
        self.expect_status(dst_file, dst_tag, StorageOp::TagCreateRes)
    }

    pub fn commit(&mut self, file: &str, tag: &str) -> Result<()> {
        let req = FileTagReq {
            worker_id: self.worker_id,
            file: file.to_string(),
            tag: tag.to_string(),
        };
        write_packet(&mut self.stream, StorageOp::TagCommitReq as u8, &req.encode())?;
        self.expect_status(file, tag, StorageOp::TagCommitRes)
    }

    pub fn delete(&mut self, file: &str, tag: &str) -> Result<()> {
        let req = FileTagReq {
            worker_id: self.worker_id,
            file: file.to_string(),
            tag: tag.to_string(),
        };
        write_packet(&mut self.stream, StorageOp::TagDeleteReq as u8, &req.encode())?;
        self.expect_status(file, tag, StorageOp::TagDeleteRes)
    }

    /// Reads one response packet expected to be either `expected` (a
    /// `StatusRes`) or `STORAGE_ERROR`, and turns a non-success status into
    /// a `WorkerError`.
    fn expect_status(&mut self, file: &str, tag: &str, expected: StorageOp) -> Result<()> {
        let (op, payload) = read_packet(&mut self.stream)?;
        match StorageOp::from_u8(op) {
            Some(op) if op == expected => {
                let res = StatusRes::decode(&payload)?;
                if res.status.is_success() {
                    Ok(())
                } else {
                    Err(WorkerError::Storage {
                        file: file.to_string(),
                        tag: tag.to_string(),
                        status: res.status,
                    })
                }
            }
            Some(StorageOp::StorageError) => {
                let err = StorageErrorMsg::decode(&payload)?;
                Err(WorkerError::Handshake(err.message))
            }
            _ => Err(WorkerError::Handshake("unexpected response opcode from storage".to_string())),
        }
    }
}

impl BlockIo for StorageClient {
    fn read_block(&mut self, file: &str, tag: &str, block_number: u32) -> Result<Vec<u8>> {
        let req = BlockReadReq {
            worker_id: self.worker_id,
            file: file.to_string(),
            tag: tag.to_string(),
            block_number,
        };
        write_packet(&mut self.stream, StorageOp::BlockReadReq as u8, &req.encode())?;

        let (op, payload) = read_packet(&mut self.stream)?;
        match StorageOp::from_u8(op) {
            Some(StorageOp::BlockReadRes) => Ok(BlockReadRes::decode(&payload)?.data),
            Some(StorageOp::StorageError) => {
                let err = StorageErrorMsg::decode(&payload)?;
                Err(WorkerError::Handshake(err.message))
            }
            _ => Err(WorkerError::Storage {
                file: file.to_string(),
                tag: tag.to_string(),
                status: StorageStatus::FileTagMissing,
            }),
        }
    }

    fn write_block(&mut self, file: &str, tag: &str, block_number: u32, data: &[u8]) -> Result<()> {
        let req = BlockWriteReq {
            worker_id: self.worker_id,
            file: file.to_string(),
            tag: tag.to_string(),
            block_number,
            data: data.to_vec(),
        };
        write_packet(&mut self.stream, StorageOp::BlockWriteReq as u8, &req.encode())?;
        self.expect_status(file, tag, StorageOp::BlockWriteRes)
    }
}
</content>
