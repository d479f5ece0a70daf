//! `QueryControlBlock` and the `QueryTable` four-list state machine,
//! grounded on `t_query_control_block`/`t_query_table` in
//! `original_source/master/src/worker_manager.h` and
//! `original_source/master/src/init_master.c`.

use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use parking_lot::Mutex as PlMutex;

use crate::config::SchedulingAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    New,
    Ready,
    Running,
    Completed,
    Canceled,
}

pub struct QueryControlBlock {
    pub query_id: u32,
    pub client_handle: Arc<Mutex<TcpStream>>,
    pub query_file_path: String,
    pub priority: u32,
    pub initial_priority: u32,
    pub ready_since: Instant,
    pub program_counter: u32,
    pub assigned_worker_id: Option<u32>,
    pub state: QueryState,
    /// Insertion sequence, used as the FIFO tie-breaker among queries with
    /// equal `ready_since` (spec §9, Open Question c).
    pub sequence: u64,
}

struct Inner {
    all: std::collections::HashMap<u32, QueryControlBlock>,
    ready: Vec<u32>,
    running: Vec<u32>,
    completed: Vec<u32>,
    canceled: Vec<u32>,
    next_query_id: u32,
    next_sequence: u64,
    total_queries: u64,
}

/// Owns every `QueryControlBlock` and the four state lists behind a single
/// table-level lock (§4.5: always acquired worker-table-then-query-table).
pub struct QueryTable {
    algorithm: SchedulingAlgorithm,
    inner: PlMutex<Inner>,
}

impl QueryTable {
    pub fn new(algorithm: SchedulingAlgorithm) -> Self {
        Self {
            algorithm,
            inner: PlMutex::new(Inner {
                all: std::collections::HashMap::new(),
                ready: Vec::new(),
                running: Vec::new(),
                completed: Vec::new(),
                canceled: Vec::new(),
                next_query_id: 1,
                next_sequence: 0,
                total_queries: 0,
            }),
        }
    }

    /// Creates a QCB in READY and inserts it into the ready list according
    /// to the configured policy (§4.1 `submit_query`).
    pub fn submit(&self, path: String, priority: u32, client_handle: Arc<Mutex<TcpStream>>) -> u32 {
        let mut inner = self.inner.lock();
        let query_id = inner.next_query_id;
        inner.next_query_id += 1;
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.total_queries += 1;

        let qcb = QueryControlBlock {
            query_id,
            client_handle,
            query_file_path: path,
            priority,
            initial_priority: priority,
            ready_since: Instant::now(),
            program_counter: 0,
            assigned_worker_id: None,
            state: QueryState::Ready,
            sequence,
        };
        inner.all.insert(query_id, qcb);
        Self::insert_ready(&mut inner, self.algorithm, query_id);
        query_id
    }

    fn insert_ready(inner: &mut Inner, algorithm: SchedulingAlgorithm, query_id: u32) {
        inner.ready.push(query_id);
        if algorithm == SchedulingAlgorithm::Priority {
            Self::sort_ready(inner);
        }
    }

    fn sort_ready(inner: &mut Inner) {
        let all = &inner.all;
        inner.ready.sort_by(|a, b| {
            let qa = &all[a];
            let qb = &all[b];
            qa.priority
                .cmp(&qb.priority)
                .then_with(|| qa.ready_since.cmp(&qb.ready_since))
                .then_with(|| qa.sequence.cmp(&qb.sequence))
        });
    }

    /// Removes the head of ready and marks it RUNNING, bound to
    /// `worker_id`. Returns the fields the caller needs to build
    /// `ASSIGN_QUERY` without holding the lock any longer than necessary.
    pub fn dispatch_head(&self, worker_id: u32) -> Option<(u32, u32, String)> {
        let mut inner = self.inner.lock();
        let query_id = inner.ready.first().copied()?;
        inner.ready.remove(0);
        inner.running.push(query_id);
        let qcb = inner.all.get_mut(&query_id).expect("ready id present in all");
        qcb.state = QueryState::Running;
        qcb.assigned_worker_id = Some(worker_id);
        Some((query_id, qcb.program_counter, qcb.query_file_path.clone()))
    }

    /// Undoes `dispatch_head` when the send to the worker failed (§4.1
    /// dispatch revert).
    pub fn revert_dispatch(&self, query_id: u32) {
        let mut inner = self.inner.lock();
        inner.running.retain(|&id| id != query_id);
        if let Some(qcb) = inner.all.get_mut(&query_id) {
            qcb.state = QueryState::Ready;
            qcb.assigned_worker_id = None;
        }
        Self::insert_ready(&mut inner, self.algorithm, query_id);
    }

    /// Applies one aging sweep: decrements the priority of every READY QCB
    /// whose `ready_since` is at least one `aging_interval` old, and
    /// re-sorts ready if anything changed (§4.1 Aging).
    pub fn age(&self, aging_interval: std::time::Duration) {
        let mut inner = self.inner.lock();
        let mut dirty = false;
        let ready = inner.ready.clone();
        for query_id in ready {
            let qcb = inner.all.get_mut(&query_id).expect("ready id present in all");
            if qcb.state != QueryState::Ready {
                continue;
            }
            let elapsed = qcb.ready_since.elapsed();
            let intervals = (elapsed.as_millis() / aging_interval.as_millis().max(1)) as u32;
            if intervals >= 1 && qcb.priority > 0 {
                let decrement = intervals.min(qcb.priority);
                qcb.priority -= decrement;
                qcb.ready_since += aging_interval * intervals;
                dirty = true;
            }
        }
        if dirty {
            Self::sort_ready(&mut inner);
        }
    }

    /// The best READY query and the worst (highest-priority-number) RUNNING
    /// query, for the preemption check (§4.1).
    pub fn preemption_candidates(&self) -> Option<(u32, u32, u32)> {
        let inner = self.inner.lock();
        let best_ready = *inner.ready.first()?;
        let worst_running = *inner
            .running
            .iter()
            .max_by_key(|id| inner.all[id].priority)?;
        let best_priority = inner.all[&best_ready].priority;
        let worst_priority = inner.all[&worst_running].priority;
        Some((best_ready, worst_running, if best_priority < worst_priority { worst_priority } else { return None }))
    }

    /// Handles `EJECT_RES`: moves the query back to READY with the
    /// checkpointed program counter, or completes cleanup if it was
    /// canceled in the meantime. Returns the prior state so the caller
    /// knows which path was taken.
    pub fn handle_eject_res(&self, query_id: u32, program_counter: u32) -> Option<QueryState> {
        let mut inner = self.inner.lock();
        let state = inner.all.get(&query_id).map(|q| q.state)?;
        inner.running.retain(|&id| id != query_id);
        match state {
            QueryState::Canceled => {
                inner.canceled.push(query_id);
            }
            _ => {
                let qcb = inner.all.get_mut(&query_id).expect("present above");
                qcb.program_counter = program_counter;
                qcb.state = QueryState::Ready;
                qcb.assigned_worker_id = None;
                qcb.ready_since = Instant::now();
                Self::insert_ready(&mut inner, self.algorithm, query_id);
            }
        }
        Some(state)
    }

    /// Moves a RUNNING query to COMPLETED (`END_QUERY` success path).
    pub fn complete(&self, query_id: u32) -> Option<Arc<Mutex<TcpStream>>> {
        let mut inner = self.inner.lock();
        inner.running.retain(|&id| id != query_id);
        inner.completed.push(query_id);
        let qcb = inner.all.get_mut(&query_id)?;
        qcb.state = QueryState::Completed;
        qcb.assigned_worker_id = None;
        Some(qcb.client_handle.clone())
    }

    /// Marks a query CANCELED wherever it currently is, removing it from
    /// whichever list held it. Returns its client handle and whether it
    /// was RUNNING (so the caller knows whether a worker eviction is owed).
    /// A no-op (returns `None`) if the query is already in a terminal
    /// state, mirroring the original's `cleaned_up` guard against double
    /// cleanup.
    pub fn cancel(&self, query_id: u32) -> Option<(Arc<Mutex<TcpStream>>, bool)> {
        let mut inner = self.inner.lock();
        let state = inner.all.get(&query_id)?.state;
        if matches!(state, QueryState::Completed | QueryState::Canceled) {
            return None;
        }
        let was_running = state == QueryState::Running;
        inner.ready.retain(|&id| id != query_id);
        inner.running.retain(|&id| id != query_id);
        inner.canceled.push(query_id);
        let qcb = inner.all.get_mut(&query_id).expect("checked present above");
        let handle = qcb.client_handle.clone();
        qcb.state = QueryState::Canceled;
        Some((handle, was_running))
    }

    pub fn get_client_handle(&self, query_id: u32) -> Option<Arc<Mutex<TcpStream>>> {
        self.inner.lock().all.get(&query_id).map(|q| q.client_handle.clone())
    }

    pub fn assigned_worker_of(&self, query_id: u32) -> Option<u32> {
        self.inner.lock().all.get(&query_id).and_then(|q| q.assigned_worker_id)
    }

    pub fn state_of(&self, query_id: u32) -> Option<QueryState> {
        self.inner.lock().all.get(&query_id).map(|q| q.state)
    }

    pub fn total_queries(&self) -> u64 {
        self.inner.lock().total_queries
    }

    pub fn ready_is_empty(&self) -> bool {
        self.inner.lock().ready.is_empty()
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
    fn fifo_dispatches_in_submission_order() {
        let table = QueryTable::new(SchedulingAlgorithm::Fifo);
        let a = table.submit("a".into(), 5, dummy_handle());
        let b = table.submit("b".into(), 1, dummy_handle());
        let (first, _, _) = table.dispatch_head(0).unwrap();
        assert_eq!(first, a);
        let (second, _, _) = table.dispatch_head(0).unwrap();
        assert_eq!(second, b);
    }

    #[test]
    fn priority_dispatches_lowest_number_first() {
        let table = QueryTable::new(SchedulingAlgorithm::Priority);
        let _a = table.submit("a".into(), 5, dummy_handle());
        let b = table.submit("b".into(), 1, dummy_handle());
        let (first, _, _) = table.dispatch_head(0).unwrap();
        assert_eq!(first, b);
    }

    #[test]
    fn revert_dispatch_reinserts_by_policy() {
        let table = QueryTable::new(SchedulingAlgorithm::Priority);
        let a = table.submit("a".into(), 5, dummy_handle());
        let b = table.submit("b".into(), 1, dummy_handle());
        table.dispatch_head(0).unwrap(); // removes b
        table.revert_dispatch(b);
        let (first, _, _) = table.dispatch_head(0).unwrap();
        assert_eq!(first, b);
        let (second, _, _) = table.dispatch_head(0).unwrap();
        assert_eq!(second, a);
    }

    #[test]
    fn eject_res_restores_ready_with_checkpoint() {
        let table = QueryTable::new(SchedulingAlgorithm::Fifo);
        let q = table.submit("a".into(), 0, dummy_handle());
        table.dispatch_head(0).unwrap();
        table.handle_eject_res(q, 7);
        assert_eq!(table.state_of(q), Some(QueryState::Ready));
    }
}
