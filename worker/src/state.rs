//! Shared state between the Master-listener and query-executor tasks,
//! grounded on the single mutex + condition variable pairing in
//! `original_source/worker/src/worker_listener.c` and
//! `original_source/worker/src/query_executor.c`.

use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::memory::MemoryManager;
use crate::storage_client::StorageClient;

pub struct CurrentQuery {
    pub query_id: u32,
    pub program_counter: u32,
    pub relative_path: String,
}

pub struct WorkerCore {
    pub current_query: Option<CurrentQuery>,
    /// Set by the executor while it is between the "fetch" and "advance PC"
    /// steps of an instruction; read by the listener to decide whether an
    /// eviction must be handled synchronously or deferred.
    pub is_executing: bool,
    pub ejection_requested: bool,
    pub should_stop: bool,
    pub memory: MemoryManager,
    pub storage: StorageClient,
}

pub struct Worker {
    pub id: u32,
    pub scripts_path: PathBuf,
    state: Mutex<WorkerCore>,
    condvar: Condvar,
}

impl Worker {
    pub fn new(id: u32, scripts_path: PathBuf, memory: MemoryManager, storage: StorageClient) -> Self {
        Self {
            id,
            scripts_path,
            state: Mutex::new(WorkerCore {
                current_query: None,
                is_executing: false,
                ejection_requested: false,
                should_stop: false,
                memory,
                storage,
            }),
            condvar: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, WorkerCore> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn condvar(&self) -> &Condvar {
        &self.condvar
    }
}
</content>
