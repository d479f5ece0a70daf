pub mod config;
pub mod error;
pub mod executor;
pub mod instruction;
pub mod listener;
pub mod memory;
pub mod state;
pub mod storage_client;

pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use state::Worker;
</content>
