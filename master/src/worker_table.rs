//! `WorkerControlBlock` and the `WorkerTable` three-list state machine,
//! grounded on `t_worker_control_block`/`t_worker_table` in
//! `original_source/master/src/worker_manager.c` and
//! `original_source/master/src/disconnection_handler.c`.

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use parking_lot::Mutex as PlMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Disconnected,
}

pub struct WorkerControlBlock {
    pub worker_id: u32,
    pub connection: Arc<Mutex<TcpStream>>,
    pub current_query_id: Option<u32>,
    pub state: WorkerState,
}

struct Inner {
    all: HashMap<u32, WorkerControlBlock>,
    idle: Vec<u32>,
    busy: Vec<u32>,
    disconnected: Vec<u32>,
    connected_count: u64,
}

/// Owns every `WorkerControlBlock` and the idle/busy/disconnected lists
/// behind a single table-level lock (§4.5: always acquired before the
/// query-table lock when both are needed).
pub struct WorkerTable {
    inner: PlMutex<Inner>,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self {
            inner: PlMutex::new(Inner {
                all: HashMap::new(),
                idle: Vec::new(),
                busy: Vec::new(),
                disconnected: Vec::new(),
                connected_count: 0,
            }),
        }
    }

    /// Registers a newly handshaken worker in IDLE (§4.1 `worker_connected`).
    /// Replaces any stale entry under the same id (a worker reconnecting
    /// after a prior disconnect), matching the original's `create_worker`
    /// which never checks for a collision.
    pub fn connect(&self, worker_id: u32, connection: Arc<Mutex<TcpStream>>) {
        let mut inner = self.inner.lock();
        inner.idle.retain(|&id| id != worker_id);
        inner.busy.retain(|&id| id != worker_id);
        inner.disconnected.retain(|&id| id != worker_id);
        inner.all.insert(
            worker_id,
            WorkerControlBlock {
                worker_id,
                connection,
                current_query_id: None,
                state: WorkerState::Idle,
            },
        );
        inner.idle.push(worker_id);
        inner.connected_count += 1;
    }

    /// Returns the id at the head of the idle list without removing it, so
    /// the scheduler can pop a ready query before committing the worker.
    pub fn peek_idle(&self) -> Option<u32> {
        self.inner.lock().idle.first().copied()
    }

    pub fn idle_is_empty(&self) -> bool {
        self.inner.lock().idle.is_empty()
    }

    /// Moves `worker_id` from idle to busy bound to `query_id`, returning
    /// its connection handle for `ASSIGN_QUERY`. `None` if it is no longer
    /// idle (already claimed, or disconnected since the peek).
    pub fn claim(&self, worker_id: u32, query_id: u32) -> Option<Arc<Mutex<TcpStream>>> {
        let mut inner = self.inner.lock();
        let pos = inner.idle.iter().position(|&id| id == worker_id)?;
        inner.idle.remove(pos);
        inner.busy.push(worker_id);
        let wcb = inner.all.get_mut(&worker_id)?;
        wcb.state = WorkerState::Busy;
        wcb.current_query_id = Some(query_id);
        Some(wcb.connection.clone())
    }

    /// Undoes `claim` when the send to the worker failed (§4.1 dispatch
    /// revert).
    pub fn revert_dispatch(&self, worker_id: u32) {
        let mut inner = self.inner.lock();
        inner.busy.retain(|&id| id != worker_id);
        if let Some(wcb) = inner.all.get_mut(&worker_id) {
            wcb.state = WorkerState::Idle;
            wcb.current_query_id = None;
        }
        if inner.all.contains_key(&worker_id) {
            inner.idle.push(worker_id);
        }
    }

    /// Moves `worker_id` back to IDLE (completion, eviction ack, or a
    /// storage error reported mid-query).
    pub fn mark_idle(&self, worker_id: u32) {
        let mut inner = self.inner.lock();
        inner.busy.retain(|&id| id != worker_id);
        if let Some(wcb) = inner.all.get_mut(&worker_id) {
            wcb.state = WorkerState::Idle;
            wcb.current_query_id = None;
            inner.idle.push(worker_id);
        }
    }

    pub fn connection_of(&self, worker_id: u32) -> Option<Arc<Mutex<TcpStream>>> {
        self.inner.lock().all.get(&worker_id).map(|w| w.connection.clone())
    }

    pub fn current_query_of(&self, worker_id: u32) -> Option<u32> {
        self.inner.lock().all.get(&worker_id).and_then(|w| w.current_query_id)
    }

    /// Removes `worker_id` from idle/busy, marks it DISCONNECTED, and
    /// returns whatever query it was holding (§4.1 `worker_disconnected`).
    pub fn disconnect(&self, worker_id: u32) -> Option<u32> {
        let mut inner = self.inner.lock();
        inner.idle.retain(|&id| id != worker_id);
        inner.busy.retain(|&id| id != worker_id);
        let current_query_id = inner.all.get(&worker_id).and_then(|w| w.current_query_id);
        if let Some(wcb) = inner.all.get_mut(&worker_id) {
            wcb.state = WorkerState::Disconnected;
            wcb.current_query_id = None;
        }
        if inner.all.contains_key(&worker_id) {
            inner.disconnected.push(worker_id);
            inner.connected_count = inner.connected_count.saturating_sub(1);
        }
        current_query_id
    }

    pub fn connected_count(&self) -> u64 {
        self.inner.lock().connected_count
    }
}

impl Default for WorkerTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn dummy_handle() -> Arc<Mutex<TcpStream>> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        Arc::new(Mutex::new(stream))
    }

    #[test]
    fn connect_lands_in_idle() {
        let table = WorkerTable::new();
        table.connect(1, dummy_handle());
        assert_eq!(table.peek_idle(), Some(1));
        assert_eq!(table.connected_count(), 1);
    }

    #[test]
    fn claim_moves_to_busy_with_query_bound() {
        let table = WorkerTable::new();
        table.connect(1, dummy_handle());
        let conn = table.claim(1, 42);
        assert!(conn.is_some());
        assert!(table.idle_is_empty());
        assert_eq!(table.current_query_of(1), Some(42));
    }

    #[test]
    fn revert_dispatch_returns_to_idle() {
        let table = WorkerTable::new();
        table.connect(1, dummy_handle());
        table.claim(1, 42);
        table.revert_dispatch(1);
        assert_eq!(table.peek_idle(), Some(1));
        assert_eq!(table.current_query_of(1), None);
    }

    #[test]
    fn disconnect_reports_held_query_and_drops_count() {
        let table = WorkerTable::new();
        table.connect(1, dummy_handle());
        table.claim(1, 7);
        let held = table.disconnect(1);
        assert_eq!(held, Some(7));
        assert_eq!(table.connected_count(), 0);
    }
}
</content>
