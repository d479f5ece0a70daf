use thiserror::Error;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] cluster_proto::ProtocolError),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MasterError>;
