//! Ties `QueryTable` and `WorkerTable` into the dispatch, aging and
//! preemption protocol of §4.1, grounded on
//! `original_source/master/src/scheduler.c` and
//! `original_source/master/src/aging.c`.

use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use cluster_proto::framing::write_packet;
use cluster_proto::messages::{
    AssignQuery, EjectQuery, MasterEndDisconnect, MasterQueryEnd,
};
use cluster_proto::{ClientOp, WorkerOp};
use tracing::{info, warn};

use crate::config::SchedulingAlgorithm;
use crate::query_table::{QueryState, QueryTable};
use crate::worker_table::WorkerTable;

/// The outcome of one dispatch attempt, driving whether `run_dispatch_loop`
/// keeps trying (§4.1: "one dispatch per call; repeatedly call while both
/// sides are non-empty").
enum DispatchOutcome {
    Dispatched,
    Reverted,
    Empty,
}

pub struct Scheduler {
    pub queries: QueryTable,
    pub workers: WorkerTable,
    algorithm: SchedulingAlgorithm,
    aging_interval: std::time::Duration,
    /// Serializes operations that must see the query and worker tables as
    /// one consistent unit (dispatch, preemption, eviction acks). Stands in
    /// for nesting the worker-table lock outside the query-table lock
    /// (§4.5) without exposing `MutexGuard`s across the table types' own
    /// encapsulation.
    coordination: Mutex<()>,
}

impl Scheduler {
    pub fn new(algorithm: SchedulingAlgorithm, aging_interval: std::time::Duration) -> Self {
        Self {
            queries: QueryTable::new(algorithm),
            workers: WorkerTable::new(),
            algorithm,
            aging_interval,
            coordination: Mutex::new(()),
        }
    }

    pub fn algorithm(&self) -> SchedulingAlgorithm {
        self.algorithm
    }

    pub fn aging_interval(&self) -> std::time::Duration {
        self.aging_interval
    }

    /// §4.1 `submit_query`.
    pub fn submit_query(&self, path: String, priority: u32, client_handle: Arc<Mutex<TcpStream>>) -> u32 {
        let query_id = self.queries.submit(path, priority, client_handle);
        info!(query_id, priority, "query admitted");
        self.run_dispatch_loop();
        query_id
    }

    /// §4.1 `worker_connected`.
    pub fn worker_connected(&self, worker_id: u32, connection: Arc<Mutex<TcpStream>>) {
        self.workers.connect(worker_id, connection);
        info!(worker_id, connected = self.workers.connected_count(), "worker connected");
        self.run_dispatch_loop();
    }

    /// Calls `dispatch_once` until it stops making progress. A reverted
    /// dispatch does not retry within the same call — the worker it failed
    /// against is back in idle, but its connection is presumed dead and a
    /// disconnect notification is expected to clean it up separately; the
    /// next external trigger (submission, completion, handshake) retries.
    pub fn run_dispatch_loop(&self) {
        loop {
            match self.dispatch_once() {
                DispatchOutcome::Dispatched => continue,
                DispatchOutcome::Reverted | DispatchOutcome::Empty => return,
            }
        }
    }

    fn dispatch_once(&self) -> DispatchOutcome {
        let _guard = self.coordination.lock().unwrap_or_else(|p| p.into_inner());

        let Some(worker_id) = self.workers.peek_idle() else {
            return DispatchOutcome::Empty;
        };
        let Some((query_id, program_counter, path)) = self.queries.dispatch_head(worker_id) else {
            return DispatchOutcome::Empty;
        };
        let connection = self
            .workers
            .claim(worker_id, query_id)
            .expect("worker peeked idle under the coordination lock stays idle until claimed");

        match send_assign_query(&connection, query_id, program_counter, &path) {
            Ok(()) => {
                info!(query_id, worker_id, program_counter, path, "query dispatched");
                DispatchOutcome::Dispatched
            }
            Err(err) => {
                warn!(%err, query_id, worker_id, "failed to dispatch, reverting");
                self.queries.revert_dispatch(query_id);
                self.workers.revert_dispatch(worker_id);
                DispatchOutcome::Reverted
            }
        }
    }

    /// §4.1 Aging: runs only under PRIORITY, ages the ready list, then
    /// always follows with a preemption check.
    pub fn aging_tick(&self) {
        if self.algorithm != SchedulingAlgorithm::Priority {
            return;
        }
        self.queries.age(self.aging_interval);
        self.preemption_check();
    }

    /// §4.1 Preemption check: evict the worst RUNNING query if a strictly
    /// better one is READY.
    pub fn preemption_check(&self) {
        let _guard = self.coordination.lock().unwrap_or_else(|p| p.into_inner());
        let Some((_best_ready, worst_running, _)) = self.queries.preemption_candidates() else {
            return;
        };
        let Some(worker_id) = self.queries.assigned_worker_of(worst_running) else {
            return;
        };
        let Some(connection) = self.workers.connection_of(worker_id) else {
            return;
        };
        let msg = EjectQuery { query_id: worst_running };
        let mut stream = connection.lock().unwrap_or_else(|p| p.into_inner());
        match write_packet(&mut *stream, WorkerOp::EjectQuery as u8, &msg.encode()) {
            Ok(()) => info!(query_id = worst_running, worker_id, "query evicted for a higher-priority query"),
            Err(err) => warn!(%err, query_id = worst_running, worker_id, "failed to send eviction request"),
        }
    }

    /// Handles `EJECT_RES(query_id, program_counter)` (§4.1).
    pub fn handle_eject_res(&self, worker_id: u32, query_id: u32, program_counter: u32) {
        let prior_state = {
            let _guard = self.coordination.lock().unwrap_or_else(|p| p.into_inner());
            let prior = self.queries.handle_eject_res(query_id, program_counter);
            self.workers.mark_idle(worker_id);
            prior
        };
        if prior_state == Some(QueryState::Canceled) {
            info!(query_id, worker_id, "evicted query was already canceled, cleanup complete");
        }
        self.run_dispatch_loop();
    }

    /// Handles `END_QUERY(worker_id, query_id)` (§4.1). The wire message
    /// doubles as both the success notice and the Worker's unrecoverable
    /// error notice (§6); since it carries no field to tell them apart, the
    /// Master always completes the query and reports success to the Query
    /// Control, per the literal state transition in §4.1
    /// (`RUNNING ->(END_QUERY)-> COMPLETED`).
    pub fn end_query(&self, worker_id: u32, query_id: u32) {
        let client_handle = {
            let _guard = self.coordination.lock().unwrap_or_else(|p| p.into_inner());
            let handle = self.queries.complete(query_id);
            self.workers.mark_idle(worker_id);
            handle
        };
        if let Some(client_handle) = client_handle {
            notify_success(&client_handle, query_id);
        }
        info!(query_id, worker_id, "query completed");
        self.run_dispatch_loop();
    }

    /// §4.1 `client_disconnected`.
    pub fn client_disconnected(&self, query_id: u32) {
        let _guard = self.coordination.lock().unwrap_or_else(|p| p.into_inner());
        let Some((_, was_running)) = self.queries.cancel(query_id) else {
            return;
        };
        if was_running {
            if let Some(worker_id) = self.queries.assigned_worker_of(query_id) {
                if let Some(connection) = self.workers.connection_of(worker_id) {
                    let msg = EjectQuery { query_id };
                    let mut stream = connection.lock().unwrap_or_else(|p| p.into_inner());
                    if let Err(err) = write_packet(&mut *stream, WorkerOp::EjectQuery as u8, &msg.encode()) {
                        warn!(%err, query_id, worker_id, "failed to request eviction after client disconnect");
                    }
                }
            }
            info!(query_id, "client disconnected while query was running, eviction requested");
        } else {
            info!(query_id, "client disconnected, query canceled in ready");
        }
    }

    /// §4.1 `worker_disconnected`.
    pub fn worker_disconnected(&self, worker_id: u32) {
        let (current_query_id, client_handle) = {
            let _guard = self.coordination.lock().unwrap_or_else(|p| p.into_inner());
            let current_query_id = self.workers.disconnect(worker_id);
            let client_handle = current_query_id.and_then(|query_id| {
                self.queries
                    .cancel(query_id)
                    .map(|(handle, _)| (query_id, handle))
            });
            (current_query_id, client_handle)
        };
        if let Some((query_id, client_handle)) = client_handle {
            notify_disconnect(&client_handle, query_id, "query canceled — worker disconnected");
        }
        info!(worker_id, ?current_query_id, "worker disconnected");
    }
}

fn send_assign_query(
    connection: &Mutex<TcpStream>,
    query_id: u32,
    program_counter: u32,
    relative_path: &str,
) -> std::io::Result<()> {
    let msg = AssignQuery {
        query_id,
        program_counter,
        relative_path: relative_path.to_string(),
    };
    let mut stream = connection.lock().unwrap_or_else(|p| p.into_inner());
    write_packet(&mut *stream, WorkerOp::AssignQuery as u8, &msg.encode())
}

pub fn notify_success(client_handle: &Mutex<TcpStream>, query_id: u32) {
    let msg = MasterQueryEnd { query_id };
    let mut stream = client_handle.lock().unwrap_or_else(|p| p.into_inner());
    if let Err(err) = write_packet(&mut *stream, ClientOp::MasterQueryEnd as u8, &msg.encode()) {
        warn!(%err, query_id, "failed to notify query control of success");
    }
}

pub fn notify_disconnect(client_handle: &Mutex<TcpStream>, query_id: u32, reason: &str) {
    let msg = MasterEndDisconnect { query_id, reason: reason.to_string() };
    let mut stream = client_handle.lock().unwrap_or_else(|p| p.into_inner());
    if let Err(err) = write_packet(&mut *stream, ClientOp::MasterEndDisconnect as u8, &msg.encode()) {
        warn!(%err, query_id, "failed to notify query control of cancellation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    fn pipe() -> (Arc<Mutex<TcpStream>>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Arc::new(Mutex::new(client)), server)
    }

    #[test]
    fn submit_then_connect_dispatches_immediately() {
        let scheduler = Scheduler::new(SchedulingAlgorithm::Fifo, Duration::from_millis(100));
        let (client_handle, _client_peer) = pipe();
        let (worker_conn, _worker_peer) = pipe();

        scheduler.submit_query("a.qry".into(), 0, client_handle);
        assert_eq!(scheduler.queries.total_queries(), 1);

        scheduler.worker_connected(1, worker_conn);
        assert_eq!(scheduler.workers.current_query_of(1), Some(1));
    }

    #[test]
    fn end_query_frees_the_worker_and_notifies_client() {
        let scheduler = Scheduler::new(SchedulingAlgorithm::Fifo, Duration::from_millis(100));
        let (client_handle, _client_peer) = pipe();
        let (worker_conn, _worker_peer) = pipe();

        let query_id = scheduler.submit_query("a.qry".into(), 0, client_handle);
        scheduler.worker_connected(1, worker_conn);
        scheduler.end_query(1, query_id);

        assert_eq!(scheduler.workers.current_query_of(1), None);
        assert!(scheduler.workers.idle_is_empty() == false);
    }

    #[test]
    fn worker_disconnect_while_running_cancels_the_query() {
        let scheduler = Scheduler::new(SchedulingAlgorithm::Fifo, Duration::from_millis(100));
        let (client_handle, _client_peer) = pipe();
        let (worker_conn, _worker_peer) = pipe();

        let query_id = scheduler.submit_query("a.qry".into(), 0, client_handle);
        scheduler.worker_connected(1, worker_conn);
        scheduler.worker_disconnected(1);

        assert_eq!(scheduler.queries.state_of(query_id), Some(QueryState::Canceled));
    }
}
</content>
