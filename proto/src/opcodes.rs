//! Operation codes for the three wire protocols in play: Query Control <->
//! Master, Master <-> Worker, and Worker <-> Storage.
//!
//! The original groups every opcode a freshly accepted Master socket might
//! see — from a Query Control *or* a Worker — into one `t_master_op_code`
//! enum (`original_source/utils/src/utils/protocol.h`), since both kinds of
//! peer dial the same listening port and the accept loop tells them apart
//! by the first opcode it reads. `ClientOp` and `WorkerOp` stay separate
//! types here for readability, but their discriminants are laid out end to
//! end in that same combined space so a freshly accepted connection can be
//! classified by trying `ClientOp::from_u8` then `WorkerOp::from_u8` on the
//! first packet without a collision.

/// Query Control <-> Master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientOp {
    QueryHandshake = 0,
    QueryHandshakeAck = 1,
    QueryFilePath = 2,
    QueryAdmitted = 3,
    MasterQueryEnd = 4,
    MasterEndDisconnect = 5,
    ReadData = 6,
}

impl ClientOp {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::QueryHandshake,
            1 => Self::QueryHandshakeAck,
            2 => Self::QueryFilePath,
            3 => Self::QueryAdmitted,
            4 => Self::MasterQueryEnd,
            5 => Self::MasterEndDisconnect,
            6 => Self::ReadData,
            _ => return None,
        })
    }
}

/// Master <-> Worker. Discriminants continue on from [`ClientOp`]'s range
/// so the two never collide on the Master's shared accept-loop socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerOp {
    WorkerHandshakeReq = 7,
    WorkerHandshakeRes = 8,
    AssignQuery = 9,
    EjectQuery = 10,
    EjectRes = 11,
    EndQuery = 12,
    ReadMsg = 13,
    EndWorker = 14,
}

impl WorkerOp {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            7 => Self::WorkerHandshakeReq,
            8 => Self::WorkerHandshakeRes,
            9 => Self::AssignQuery,
            10 => Self::EjectQuery,
            11 => Self::EjectRes,
            12 => Self::EndQuery,
            13 => Self::ReadMsg,
            14 => Self::EndWorker,
            _ => return None,
        })
    }
}

/// Worker <-> Storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageOp {
    SendIdReq = 0,
    SendIdRes = 1,
    GetBlockSizeReq = 2,
    GetBlockSizeRes = 3,
    FileCreateReq = 4,
    FileCreateRes = 5,
    FileTruncateReq = 6,
    FileTruncateRes = 7,
    TagCreateReq = 8,
    TagCreateRes = 9,
    TagCommitReq = 10,
    TagCommitRes = 11,
    TagDeleteReq = 12,
    TagDeleteRes = 13,
    BlockReadReq = 14,
    BlockReadRes = 15,
    BlockWriteReq = 16,
    BlockWriteRes = 17,
    StorageError = 18,
}

impl StorageOp {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::SendIdReq,
            1 => Self::SendIdRes,
            2 => Self::GetBlockSizeReq,
            3 => Self::GetBlockSizeRes,
            4 => Self::FileCreateReq,
            5 => Self::FileCreateRes,
            6 => Self::FileTruncateReq,
            7 => Self::FileTruncateRes,
            8 => Self::TagCreateReq,
            9 => Self::TagCreateRes,
            10 => Self::TagCommitReq,
            11 => Self::TagCommitRes,
            12 => Self::TagDeleteReq,
            13 => Self::TagDeleteRes,
            14 => Self::BlockReadReq,
            15 => Self::BlockReadRes,
            16 => Self::BlockWriteReq,
            17 => Self::BlockWriteRes,
            18 => Self::StorageError,
            _ => return None,
        })
    }
}
