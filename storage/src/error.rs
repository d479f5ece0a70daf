use cluster_proto::StorageStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file:tag not found")]
    FileTagMissing,
    #[error("file:tag already exists")]
    FileTagAlreadyExists,
    #[error("file:tag is already committed")]
    FileAlreadyCommitted,
    #[error("block number out of bounds")]
    ReadOutOfBounds,
    #[error("no free physical blocks remain")]
    NotEnoughSpace,
    #[error("initial_file:BASE cannot be deleted")]
    CannotDeleteSeed,
    #[error("blocks_hash_index.config points at a physical block with no surviving logical reference")]
    CorruptHashIndex,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed metadata.config for {0}:{1}")]
    MalformedMetadata(String, String),
    #[error("malformed superblock.config")]
    MalformedSuperblock,
    #[error("protocol error: {0}")]
    Protocol(#[from] cluster_proto::ProtocolError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Maps a domain error onto the wire `i8` status; non-domain errors have
    /// no representation in §6 and are handled by the caller via
    /// `STORAGE_ERROR` instead.
    pub fn to_status(&self) -> Option<StorageStatus> {
        match self {
            Self::FileTagMissing => Some(StorageStatus::FileTagMissing),
            Self::FileTagAlreadyExists => Some(StorageStatus::FileTagAlreadyExists),
            Self::FileAlreadyCommitted => Some(StorageStatus::FileAlreadyCommitted),
            Self::ReadOutOfBounds => Some(StorageStatus::ReadOutOfBounds),
            Self::NotEnoughSpace => Some(StorageStatus::NotEnoughSpace),
            _ => None,
        }
    }
}
