use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] cluster_proto::ProtocolError),
    #[error("storage reported an error for {file}:{tag}: {status}")]
    Storage {
        file: String,
        tag: String,
        status: cluster_proto::StorageStatus,
    },
    #[error("malformed instruction at line {line}: {text}")]
    MalformedInstruction { line: u32, text: String },
    #[error("page {page} out of range for {file}:{tag} ({page_count} pages)")]
    PageOutOfRange {
        file: String,
        tag: String,
        page: u32,
        page_count: u32,
    },
    #[error("memory exhausted: no frame available and no victim could be selected")]
    MemoryExhausted,
    #[error("handshake with {0} failed")]
    Handshake(String),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
