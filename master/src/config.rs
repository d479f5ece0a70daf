//! `MasterConfig`, grounded on `original_source/master/src/config/master_config.c`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MasterError, Result};

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

/// `ALGORITMO_PLANIFICACION`: selects the ready-list discipline described in
/// §4.1. FIFO never preempts and never ages; PRIORITY orders by
/// `(priority asc, ready_since asc)` and runs both the aging and preemption
/// loops.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchedulingAlgorithm {
    Fifo,
    Priority,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    #[serde(rename = "ip_escucha")]
    pub ip: String,
    #[serde(rename = "puerto_escucha")]
    pub port: u16,
    #[serde(rename = "algoritmo_planificacion")]
    pub scheduling_algorithm: SchedulingAlgorithm,
    #[serde(rename = "tiempo_aging_ms")]
    pub aging_interval_ms: u64,
    pub log_level: LogLevel,
}

impl MasterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(MasterError::Io)?;
        toml::from_str(&raw).map_err(|e| MasterError::Config(format!("{path:?}: {e}")))
    }

    pub fn aging_interval(&self) -> Duration {
        Duration::from_millis(self.aging_interval_ms)
    }
}
