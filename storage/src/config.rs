use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn to_tracing(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

/// Storage's config file, deserialized directly from TOML — see §6 of
/// SPEC_FULL.md for the field-by-field rationale of this over a dynamic
/// property bag.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "storage_ip")]
    pub ip: String,
    #[serde(rename = "storage_port")]
    pub port: u16,
    pub fresh_start: bool,
    #[serde(rename = "mount_point")]
    pub mount_point: PathBuf,
    pub operation_delay_ms: u64,
    pub block_access_delay_ms: u64,
    pub log_level: LogLevel,
}

impl StorageConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{path:?}: {e}"),
            ))
        })
    }
}
