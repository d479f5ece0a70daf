//! Query-executor task: the fetch-decode-execute loop, grounded on
//! `original_source/worker/src/query_executor.c`.

use std::fs;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use cluster_proto::messages::{EjectRes, EndQuery, ReadMsg};
use cluster_proto::WorkerOp;
use tracing::{error, info};

use crate::error::{Result, WorkerError};
use crate::instruction::{self, Instruction};
use crate::listener::send_to_master;
use crate::state::{Worker, WorkerCore};

pub fn run(worker: Arc<Worker>, master: Arc<Mutex<TcpStream>>) {
    loop {
        let mut core = worker.lock();
        while core.current_query.is_none() && !core.should_stop {
            core = worker.condvar().wait(core).unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if core.current_query.is_none() {
            return;
        }
        core.is_executing = true;
        drop(core);

        execute_current_query(&worker, &master);

        let mut core = worker.lock();
        core.is_executing = false;
        let stop = core.should_stop && core.current_query.is_none();
        drop(core);
        if stop {
            return;
        }
    }
}

fn execute_current_query(worker: &Worker, master: &Mutex<TcpStream>) {
    loop {
        {
            let mut core = worker.lock();
            if core.ejection_requested {
                handle_ejection(&mut core, master);
                return;
            }
        }

        let (query_id, program_counter, relative_path) = {
            let core = worker.lock();
            match &core.current_query {
                Some(q) => (q.query_id, q.program_counter, q.relative_path.clone()),
                None => return,
            }
        };

        let line = match fetch_instruction(&worker.scripts_path, &relative_path, program_counter) {
            Ok(line) => line,
            Err(err) => {
                error!(%err, query_id, program_counter, "failed to fetch instruction");
                finish_query(worker, master, query_id, "error");
                return;
            }
        };

        let decoded = match instruction::decode(program_counter, &line) {
            Ok(instr) => instr,
            Err(err) => {
                error!(%err, query_id, "malformed instruction");
                finish_query(worker, master, query_id, "error");
                return;
            }
        };

        info!(query_id, program_counter, instruction = %line, "executing instruction");

        if matches!(decoded, Instruction::End) {
            finish_query(worker, master, query_id, "completed");
            return;
        }

        let result = {
            let mut core = worker.lock();
            execute_instruction(&mut core, master, worker.id, query_id, &decoded)
        };

        if let Err(err) = result {
            error!(%err, query_id, "instruction execution failed");
            finish_query(worker, master, query_id, "error");
            return;
        }

        {
            let mut core = worker.lock();
            if let Some(q) = core.current_query.as_mut() {
                if q.query_id == query_id {
                    q.program_counter = program_counter + 1;
                }
            }
        }

        {
            let mut core = worker.lock();
            if core.ejection_requested {
                handle_ejection(&mut core, master);
                return;
            }
        }
    }
}

fn execute_instruction(
    core: &mut WorkerCore,
    master: &Mutex<TcpStream>,
    worker_id: u32,
    query_id: u32,
    instr: &Instruction,
) -> Result<()> {
    match instr {
        Instruction::Create { file, tag } => core.storage.create(file, tag),
        Instruction::Truncate { file, tag, size } => core.storage.truncate(file, tag, *size),
        Instruction::Write { file, tag, base, data } => {
            core.memory.get_or_create_page_table(file, tag);
            core.memory.write(&mut core.storage, file, tag, *base, data)
        }
        Instruction::Read { file, tag, base, size } => {
            core.memory.get_or_create_page_table(file, tag);
            let data = core.memory.read(&mut core.storage, file, tag, *base, *size)?;
            let msg = ReadMsg {
                worker_id,
                query_id,
                data,
                file: file.clone(),
                tag: tag.clone(),
            };
            send_to_master(master, WorkerOp::ReadMsg, &msg.encode());
            Ok(())
        }
        Instruction::Tag { src_file, src_tag, dst_file, dst_tag } => {
            core.storage.tag(src_file, src_tag, dst_file, dst_tag)
        }
        Instruction::Commit { file, tag } => core.storage.commit(file, tag),
        Instruction::Flush { file, tag } => core.memory.flush(&mut core.storage, file, tag),
        Instruction::Delete { file, tag } => {
            core.memory.remove_mapping(&mut core.storage, file, tag)?;
            core.storage.delete(file, tag)
        }
        Instruction::End => unreachable!("END is handled by the caller before dispatch"),
    }
}

/// Flushes dirty pages and sends `EJECT_RES` with the checkpointed PC.
fn handle_ejection(core: &mut WorkerCore, master: &Mutex<TcpStream>) {
    let Some(current) = core.current_query.take() else {
        return;
    };
    let _ = core.memory.flush_all_dirty(&mut core.storage);
    core.memory.bind_query(None);
    core.ejection_requested = false;

    let res = EjectRes {
        query_id: current.query_id,
        program_counter: current.program_counter,
    };
    send_to_master(master, WorkerOp::EjectRes, &res.encode());
    info!(
        query_id = current.query_id,
        program_counter = current.program_counter,
        "query evicted during execution"
    );
}

/// Sends `END_QUERY(worker_id, query_id)` — the wire message doubles as
/// both the success notice and the unrecoverable-error notice (§6); only
/// guards against clearing a query slot a concurrent `ASSIGN_QUERY` has
/// already overwritten (the race the original protects against in
/// `query_executor_thread`).
fn finish_query(worker: &Worker, master: &Mutex<TcpStream>, query_id: u32, outcome: &str) {
    let mut core = worker.lock();
    let _ = core.memory.flush_all_dirty(&mut core.storage);
    if core.current_query.as_ref().map(|q| q.query_id) == Some(query_id) {
        core.current_query = None;
        core.memory.bind_query(None);
    }
    drop(core);

    let msg = EndQuery { worker_id: worker.id, query_id };
    send_to_master(master, WorkerOp::EndQuery, &msg.encode());
    info!(query_id, outcome, "query finished");
}

fn fetch_instruction(scripts_path: &std::path::Path, relative_path: &str, line_number: u32) -> Result<String> {
    let path: PathBuf = scripts_path.join(relative_path);
    let content = fs::read_to_string(&path)?;
    content
        .lines()
        .nth(line_number as usize)
        .map(|s| s.to_string())
        .ok_or_else(|| WorkerError::MalformedInstruction {
            line: line_number,
            text: format!("no line {line_number} in {path:?}"),
        })
}
</content>
