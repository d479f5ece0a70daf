//! Typed payloads for every message named in §6, built on [`crate::framing`].
//!
//! Each message knows how to encode itself into a [`FrameWriter`] and how to
//! decode itself back out of a [`FrameReader`]; callers pair that with the
//! matching opcode from [`crate::opcodes`] when they call
//! [`crate::framing::write_packet`] / [`crate::framing::read_packet`].

use crate::framing::{FrameReader, FrameWriter, Result};
use crate::status::StorageStatus;

// ---------------------------------------------------------------------
// Query Control <-> Master
// ---------------------------------------------------------------------

/// `path\x1Fpriority` as carried by `QUERY_FILE_PATH`.
pub struct QueryFilePath {
    pub path: String,
    pub priority: u32,
}

impl QueryFilePath {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_string(&format!("{}\u{1F}{}", self.path, self.priority));
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        let raw = r.read_string()?;
        let (path, priority) = raw
            .split_once('\u{1F}')
            .ok_or(crate::framing::ProtocolError::Truncated("query_file_path"))?;
        let priority = priority
            .parse()
            .map_err(|_| crate::framing::ProtocolError::Truncated("priority"))?;
        Ok(Self {
            path: path.to_string(),
            priority,
        })
    }
}

pub struct MasterQueryEnd {
    pub query_id: u32,
}

impl MasterQueryEnd {
    pub fn encode(&self) -> Vec<u8> {
        FrameWriter::new().write_u32(self.query_id).into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            query_id: FrameReader::new(payload).read_u32()?,
        })
    }
}

pub struct MasterEndDisconnect {
    pub query_id: u32,
    pub reason: String,
}

impl MasterEndDisconnect {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.query_id).write_string(&self.reason);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            query_id: r.read_u32()?,
            reason: r.read_string()?,
        })
    }
}

/// Master's reply to `QUERY_HANDSHAKE`, carrying the client id it assigned
/// to this Query Control session (§6).
pub struct QueryHandshakeAck {
    pub client_id: u32,
}

impl QueryHandshakeAck {
    pub fn encode(&self) -> Vec<u8> {
        FrameWriter::new().write_u32(self.client_id).into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            client_id: FrameReader::new(payload).read_u32()?,
        })
    }
}

/// Master's acknowledgement that `QUERY_FILE_PATH` admitted the query,
/// carrying the assigned `query_id` (§6).
pub struct QueryAdmitted {
    pub query_id: u32,
}

impl QueryAdmitted {
    pub fn encode(&self) -> Vec<u8> {
        FrameWriter::new().write_u32(self.query_id).into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            query_id: FrameReader::new(payload).read_u32()?,
        })
    }
}

pub struct ReadData {
    pub data: Vec<u8>,
    pub file_tag: String,
}

impl ReadData {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_bytes(&self.data).write_string(&self.file_tag);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            data: r.read_bytes()?,
            file_tag: r.read_string()?,
        })
    }
}

// ---------------------------------------------------------------------
// Master <-> Worker
// ---------------------------------------------------------------------

pub struct WorkerHandshakeReq {
    pub worker_id: String,
}

impl WorkerHandshakeReq {
    pub fn encode(&self) -> Vec<u8> {
        FrameWriter::new().write_string(&self.worker_id).into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            worker_id: FrameReader::new(payload).read_string()?,
        })
    }
}

/// Master's acknowledgement of `WORKER_HANDSHAKE_REQ` (§6); an empty
/// payload, carried purely so the Worker knows the handshake landed before
/// it starts waiting for `ASSIGN_QUERY`.
pub struct WorkerHandshakeRes;

impl WorkerHandshakeRes {
    pub fn encode(&self) -> Vec<u8> {
        Vec::new()
    }

    pub fn decode(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

pub struct AssignQuery {
    pub query_id: u32,
    pub program_counter: u32,
    pub relative_path: String,
}

impl AssignQuery {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.query_id)
            .write_u32(self.program_counter)
            .write_string(&self.relative_path);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            query_id: r.read_u32()?,
            program_counter: r.read_u32()?,
            relative_path: r.read_string()?,
        })
    }
}

pub struct EjectQuery {
    pub query_id: u32,
}

impl EjectQuery {
    pub fn encode(&self) -> Vec<u8> {
        FrameWriter::new().write_u32(self.query_id).into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            query_id: FrameReader::new(payload).read_u32()?,
        })
    }
}

pub struct EjectRes {
    pub query_id: u32,
    pub program_counter: u32,
}

impl EjectRes {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.query_id).write_u32(self.program_counter);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            query_id: r.read_u32()?,
            program_counter: r.read_u32()?,
        })
    }
}

pub struct EndQuery {
    pub worker_id: u32,
    pub query_id: u32,
}

impl EndQuery {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.worker_id).write_u32(self.query_id);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            worker_id: r.read_u32()?,
            query_id: r.read_u32()?,
        })
    }
}

pub struct ReadMsg {
    pub worker_id: u32,
    pub query_id: u32,
    pub data: Vec<u8>,
    pub file: String,
    pub tag: String,
}

impl ReadMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.worker_id)
            .write_u32(self.query_id)
            .write_bytes(&self.data)
            .write_string(&self.file)
            .write_string(&self.tag);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            worker_id: r.read_u32()?,
            query_id: r.read_u32()?,
            data: r.read_bytes()?,
            file: r.read_string()?,
            tag: r.read_string()?,
        })
    }
}

// ---------------------------------------------------------------------
// Worker <-> Storage
// ---------------------------------------------------------------------

pub struct SendIdReq {
    pub worker_id: u32,
}

impl SendIdReq {
    pub fn encode(&self) -> Vec<u8> {
        FrameWriter::new().write_u32(self.worker_id).into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            worker_id: FrameReader::new(payload).read_u32()?,
        })
    }
}

pub struct GetBlockSizeRes {
    pub block_size: u16,
}

impl GetBlockSizeRes {
    pub fn encode(&self) -> Vec<u8> {
        FrameWriter::new().write_u16(self.block_size).into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            block_size: FrameReader::new(payload).read_u16()?,
        })
    }
}

pub struct FileTagReq {
    pub worker_id: u32,
    pub file: String,
    pub tag: String,
}

impl FileTagReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.worker_id).write_string(&self.file).write_string(&self.tag);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            worker_id: r.read_u32()?,
            file: r.read_string()?,
            tag: r.read_string()?,
        })
    }
}

pub struct FileTruncateReq {
    pub worker_id: u32,
    pub file: String,
    pub tag: String,
    pub new_size: u32,
}

impl FileTruncateReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.worker_id)
            .write_string(&self.file)
            .write_string(&self.tag)
            .write_u32(self.new_size);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            worker_id: r.read_u32()?,
            file: r.read_string()?,
            tag: r.read_string()?,
            new_size: r.read_u32()?,
        })
    }
}

pub struct TagCreateReq {
    pub worker_id: u32,
    pub src_file: String,
    pub src_tag: String,
    pub dst_file: String,
    pub dst_tag: String,
}

impl TagCreateReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.worker_id)
            .write_string(&self.src_file)
            .write_string(&self.src_tag)
            .write_string(&self.dst_file)
            .write_string(&self.dst_tag);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            worker_id: r.read_u32()?,
            src_file: r.read_string()?,
            src_tag: r.read_string()?,
            dst_file: r.read_string()?,
            dst_tag: r.read_string()?,
        })
    }
}

pub struct StatusRes {
    pub status: StorageStatus,
}

impl StatusRes {
    pub fn encode(&self) -> Vec<u8> {
        FrameWriter::new().write_i8(self.status.to_i8()).into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let code = FrameReader::new(payload).read_i8()?;
        let status = StorageStatus::from_i8(code)
            .ok_or(crate::framing::ProtocolError::Truncated("status code"))?;
        Ok(Self { status })
    }
}

pub struct BlockReadReq {
    pub worker_id: u32,
    pub file: String,
    pub tag: String,
    pub block_number: u32,
}

impl BlockReadReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.worker_id)
            .write_string(&self.file)
            .write_string(&self.tag)
            .write_u32(self.block_number);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            worker_id: r.read_u32()?,
            file: r.read_string()?,
            tag: r.read_string()?,
            block_number: r.read_u32()?,
        })
    }
}

pub struct BlockReadRes {
    pub data: Vec<u8>,
}

impl BlockReadRes {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.data.len() as u32).write_bytes(&self.data);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        let _size = r.read_u32()?;
        Ok(Self { data: r.read_bytes()? })
    }
}

pub struct BlockWriteReq {
    pub worker_id: u32,
    pub file: String,
    pub tag: String,
    pub block_number: u32,
    pub data: Vec<u8>,
}

impl BlockWriteReq {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.worker_id)
            .write_string(&self.file)
            .write_string(&self.tag)
            .write_u32(self.block_number)
            .write_bytes(&self.data);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            worker_id: r.read_u32()?,
            file: r.read_string()?,
            tag: r.read_string()?,
            block_number: r.read_u32()?,
            data: r.read_bytes()?,
        })
    }
}

pub struct StorageErrorMsg {
    pub query_id: u32,
    pub message: String,
}

impl StorageErrorMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.write_u32(self.query_id).write_string(&self.message);
        w.into_payload()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = FrameReader::new(payload);
        Ok(Self {
            query_id: r.read_u32()?,
            message: r.read_string()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_file_path_round_trips() {
        let msg = QueryFilePath {
            path: "scripts/a.qry".to_string(),
            priority: 7,
        };
        let decoded = QueryFilePath::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.path, "scripts/a.qry");
        assert_eq!(decoded.priority, 7);
    }

    #[test]
    fn block_write_req_round_trips() {
        let msg = BlockWriteReq {
            worker_id: 3,
            file: "f".into(),
            tag: "t1".into(),
            block_number: 2,
            data: vec![9; 16],
        };
        let decoded = BlockWriteReq::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.block_number, 2);
        assert_eq!(decoded.data, vec![9; 16]);
    }

    #[test]
    fn status_res_round_trips() {
        let msg = StatusRes {
            status: StorageStatus::NotEnoughSpace,
        };
        let decoded = StatusRes::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.status, StorageStatus::NotEnoughSpace);
    }
}
