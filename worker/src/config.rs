//! `WorkerConfig`, grounded on `original_source/worker/src/config/worker_config.c`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, WorkerError};

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

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplacementAlgorithm {
    Lru,
    #[serde(rename = "CLOCK_M")]
    ClockM,
}

fn default_page_size() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(rename = "ip_master")]
    pub master_ip: String,
    #[serde(rename = "puerto_master")]
    pub master_port: u16,
    #[serde(rename = "ip_storage")]
    pub storage_ip: String,
    #[serde(rename = "puerto_storage")]
    pub storage_port: u16,
    #[serde(rename = "tam_memoria")]
    pub memory_size: usize,
    /// Present in the original's sizing math but never a named config key —
    /// the real worker always takes its page size from Storage's reported
    /// block size at handshake time. Kept as a pre-handshake fallback only.
    #[serde(rename = "tam_pagina", default = "default_page_size")]
    pub page_size: usize,
    #[serde(rename = "retardo_memoria_ms")]
    pub memory_delay_ms: u64,
    #[serde(rename = "algoritmo_reemplazo")]
    pub replacement_algorithm: ReplacementAlgorithm,
    #[serde(rename = "path_scripts")]
    pub scripts_path: PathBuf,
    pub log_level: LogLevel,
}

impl WorkerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(WorkerError::Io)?;
        toml::from_str(&raw).map_err(|e| WorkerError::Config(format!("{path:?}: {e}")))
    }
}
