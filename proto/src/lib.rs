//! Shared wire protocol for the Query Control, Master, Worker and Storage
//! binaries: framing primitives, opcode tables and typed message payloads.

pub mod framing;
pub mod messages;
pub mod opcodes;
pub mod status;

pub use framing::{FrameReader, FrameWriter, ProtocolError, Result};
pub use opcodes::{ClientOp, StorageOp, WorkerOp};
pub use status::StorageStatus;
