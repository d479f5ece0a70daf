//! Demand-paged memory manager, grounded on
//! `original_source/worker/src/memory/memory_manager.c`.
//!
//! The C original keeps one flat array of `file_tag_entry_t` and linearly
//! scans it (and, for LRU, every page table in it) on every replacement
//! decision. This port keys mappings by `(file, tag)` in a `HashMap` and
//! keeps a reverse `frame -> owner` index so replacement never needs to
//! walk every page table.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ReplacementAlgorithm;
use crate::error::{Result, WorkerError};
use crate::memory::{FrameTable, PageTable};

/// Abstracts the Worker's Storage connection so [`MemoryManager`] can be
/// driven by a real `TcpStream`-backed client or, in tests, an in-memory
/// fake — see §8 of SPEC_FULL.md's test-tooling guidance.
pub trait BlockIo {
    fn read_block(&mut self, file: &str, tag: &str, block_number: u32) -> Result<Vec<u8>>;
    fn write_block(&mut self, file: &str, tag: &str, block_number: u32, data: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FrameOwner {
    file: String,
    tag: String,
    page: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    fn label(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
        }
    }
}

pub struct MemoryManager {
    physical: Vec<u8>,
    page_size: usize,
    memory_delay: Duration,
    replacement: ReplacementAlgorithm,
    frames: FrameTable,
    frame_owner: Vec<Option<FrameOwner>>,
    tables: HashMap<(String, String), PageTable>,
    /// Process-wide monotonic counter backing LRU recency stamps.
    clock: u64,
    current_query_id: Option<u32>,
}

impl MemoryManager {
    pub fn new(memory_size: usize, page_size: usize, memory_delay: Duration, replacement: ReplacementAlgorithm) -> Self {
        let frame_count = (memory_size / page_size).max(1) as u32;
        Self {
            physical: vec![0u8; frame_count as usize * page_size],
            page_size,
            memory_delay,
            replacement,
            frames: FrameTable::new(frame_count),
            frame_owner: vec![None; frame_count as usize],
            tables: HashMap::new(),
            clock: 0,
            current_query_id: None,
        }
    }

    pub fn bind_query(&mut self, query_id: Option<u32>) {
        self.current_query_id = query_id;
    }

    pub fn get_or_create_page_table(&mut self, file: &str, tag: &str) -> &mut PageTable {
        self.tables
            .entry((file.to_string(), tag.to_string()))
            .or_insert_with(|| PageTable::new(1))
    }

    pub fn read<B: BlockIo>(&mut self, io: &mut B, file: &str, tag: &str, base: u64, size: u32) -> Result<Vec<u8>> {
        self.access(io, file, tag, base, size, AccessKind::Read, None)
    }

    pub fn write<B: BlockIo>(&mut self, io: &mut B, file: &str, tag: &str, base: u64, data: &[u8]) -> Result<()> {
        self.access(io, file, tag, base, data.len() as u32, AccessKind::Write, Some(data))?;
        Ok(())
    }

    /// Per-page loop shared by `READ` and `WRITE`: fault in missing pages,
    /// copy bytes against the frame, stamp recency/use bits, and emit the
    /// structured per-access log line required by §4.2.
    fn access<B: BlockIo>(
        &mut self,
        io: &mut B,
        file: &str,
        tag: &str,
        base: u64,
        size: u32,
        kind: AccessKind,
        data: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        self.get_or_create_page_table(file, tag);
        let key = (file.to_string(), tag.to_string());
        let page_size = self.page_size as u64;

        let mut out = Vec::with_capacity(size as usize);
        let mut offset = base;
        let mut remaining = size as u64;
        let mut src_pos = 0usize;

        while remaining > 0 {
            let page_number = (offset / page_size) as u32;
            let page_offset = (offset % page_size) as usize;
            let chunk = ((page_size as usize) - page_offset).min(remaining as usize);

            thread::sleep(self.memory_delay);

            let present = self
                .tables
                .get(&key)
                .and_then(|t| t.get(page_number))
                .map(|e| e.present)
                .unwrap_or(false);
            if !present {
                self.page_fault(io, file, tag, page_number)?;
            }

            self.clock += 1;
            let clock_val = self.clock;
            let frame;
            {
                let table = self.tables.get_mut(&key).expect("page table created above");
                table.ensure_len(page_number + 1);
                let entry = table.get_mut(page_number).expect("page faulted in above");
                entry.last_access_time = clock_val;
                entry.use_bit = true;
                if kind == AccessKind::Write {
                    entry.dirty = true;
                }
                frame = entry.frame;
            }

            let phys_addr = frame as u64 * page_size + page_offset as u64;
            let start = phys_addr as usize;

            let preview_slice = match kind {
                AccessKind::Read => {
                    out.extend_from_slice(&self.physical[start..start + chunk]);
                    &self.physical[start..start + chunk]
                }
                AccessKind::Write => {
                    let src = &data.expect("write carries data")[src_pos..src_pos + chunk];
                    self.physical[start..start + chunk].copy_from_slice(src);
                    src_pos += chunk;
                    &self.physical[start..start + chunk]
                }
            };

            thread::sleep(self.memory_delay);

            info!(
                query_id = ?self.current_query_id,
                action = kind.label(),
                phys_addr,
                preview = %preview(preview_slice),
                "memory access"
            );

            offset += chunk as u64;
            remaining -= chunk as u64;
        }

        Ok(out)
    }

    fn page_fault<B: BlockIo>(&mut self, io: &mut B, file: &str, tag: &str, page_number: u32) -> Result<()> {
        let frame = self.allocate_frame(io)?;
        let result = io.read_block(file, tag, page_number);
        let block = match result {
            Ok(block) => block,
            Err(err) => {
                self.frames.free(frame);
                return Err(err);
            }
        };

        let start = frame as usize * self.page_size;
        let len = block.len().min(self.page_size);
        self.physical[start..start + len].copy_from_slice(&block[..len]);
        if len < self.page_size {
            self.physical[start + len..start + self.page_size].fill(0);
        }

        let key = (file.to_string(), tag.to_string());
        let table = self.tables.get_mut(&key).expect("page table created by caller");
        table.ensure_len(page_number + 1);
        table.map(page_number, frame);

        self.frame_owner[frame as usize] = Some(FrameOwner {
            file: file.to_string(),
            tag: tag.to_string(),
            page: page_number,
        });

        debug!(file, tag, page_number, frame, "page fault resolved");
        Ok(())
    }

    fn allocate_frame<B: BlockIo>(&mut self, io: &mut B) -> Result<u32> {
        if let Some(frame) = self.frames.allocate_free() {
            return Ok(frame);
        }
        let frame = match self.replacement {
            ReplacementAlgorithm::Lru => self.evict_lru(io)?,
            ReplacementAlgorithm::ClockM => self.evict_clock_m(io)?,
        };
        self.frames.mark_used(frame);
        Ok(frame)
    }

    /// Scans every owned frame for the minimum `last_access_time`.
    fn evict_lru<B: BlockIo>(&mut self, io: &mut B) -> Result<u32> {
        let mut victim: Option<(u32, u64)> = None;
        for frame in 0..self.frames.frame_count() {
            let Some(owner) = &self.frame_owner[frame as usize] else {
                continue;
            };
            let Some(entry) = self
                .tables
                .get(&(owner.file.clone(), owner.tag.clone()))
                .and_then(|t| t.get(owner.page))
            else {
                continue;
            };
            let replace = match victim {
                Some((_, t)) => entry.last_access_time < t,
                None => true,
            };
            if replace {
                victim = Some((frame, entry.last_access_time));
            }
        }
        let (frame, _) = victim.ok_or(WorkerError::MemoryExhausted)?;
        debug!(frame, "LRU victim selected");
        self.writeback_and_free(io, frame)?;
        Ok(frame)
    }

    /// Two-pass second-chance (Clock-M) replacement over the frame ring,
    /// starting at the frame table's clock pointer.
    fn evict_clock_m<B: BlockIo>(&mut self, io: &mut B) -> Result<u32> {
        let n = self.frames.frame_count();
        if n == 0 {
            return Err(WorkerError::MemoryExhausted);
        }
        loop {
            for _ in 0..n {
                let frame = self.frames.clock_pointer() as u32;
                self.frames.advance_clock();
                let Some(owner) = self.frame_owner[frame as usize].clone() else {
                    continue;
                };
                let Some(entry) = self.tables.get(&(owner.file.clone(), owner.tag.clone())).and_then(|t| t.get(owner.page)) else {
                    continue;
                };
                if !entry.use_bit && !entry.dirty {
                    debug!(frame, "clock-m pass 1 victim selected");
                    self.writeback_and_free(io, frame)?;
                    return Ok(frame);
                }
            }

            let mut candidate = None;
            for _ in 0..n {
                let frame = self.frames.clock_pointer() as u32;
                self.frames.advance_clock();
                let Some(owner) = self.frame_owner[frame as usize].clone() else {
                    continue;
                };
                let key = (owner.file.clone(), owner.tag.clone());
                let Some(table) = self.tables.get_mut(&key) else {
                    continue;
                };
                let Some(entry) = table.get_mut(owner.page) else {
                    continue;
                };
                if entry.use_bit {
                    entry.use_bit = false;
                } else if entry.dirty && candidate.is_none() {
                    candidate = Some(frame);
                }
            }

            if let Some(frame) = candidate {
                debug!(frame, "clock-m pass 2 victim selected");
                self.writeback_and_free(io, frame)?;
                return Ok(frame);
            }
            // Pass 2 cleared every use bit it saw; pass 1 is guaranteed to
            // find a (use_bit=0, dirty=0) frame on the next lap.
        }
    }

    fn writeback_and_free<B: BlockIo>(&mut self, io: &mut B, frame: u32) -> Result<()> {
        let Some(owner) = self.frame_owner[frame as usize].take() else {
            self.frames.free(frame);
            return Ok(());
        };
        let key = (owner.file.clone(), owner.tag.clone());
        if let Some(table) = self.tables.get_mut(&key) {
            let dirty = table.get(owner.page).map(|e| e.dirty).unwrap_or(false);
            if dirty {
                let start = frame as usize * self.page_size;
                let bytes = self.physical[start..start + self.page_size].to_vec();
                io.write_block(&owner.file, &owner.tag, owner.page, &bytes)?;
            }
            table.unmap(owner.page);
        }
        self.frames.free(frame);
        Ok(())
    }

    pub fn flush<B: BlockIo>(&mut self, io: &mut B, file: &str, tag: &str) -> Result<()> {
        let key = (file.to_string(), tag.to_string());
        let dirty: Vec<(u32, u32)> = match self.tables.get(&key) {
            Some(table) => table.dirty_pages().map(|e| (e.page_number, e.frame)).collect(),
            None => return Ok(()),
        };
        for (page_number, frame) in dirty {
            let start = frame as usize * self.page_size;
            let bytes = self.physical[start..start + self.page_size].to_vec();
            io.write_block(file, tag, page_number, &bytes)?;
            if let Some(table) = self.tables.get_mut(&key) {
                table.set_dirty(page_number, false);
            }
        }
        Ok(())
    }

    pub fn flush_all_dirty<B: BlockIo>(&mut self, io: &mut B) -> Result<()> {
        let keys: Vec<(String, String)> = self.tables.keys().cloned().collect();
        for (file, tag) in keys {
            self.flush(io, &file, &tag)?;
        }
        Ok(())
    }

    pub fn remove_mapping<B: BlockIo>(&mut self, io: &mut B, file: &str, tag: &str) -> Result<()> {
        self.flush(io, file, tag)?;
        let key = (file.to_string(), tag.to_string());
        if let Some(table) = self.tables.remove(&key) {
            for entry in table.present_pages() {
                self.frame_owner[entry.frame as usize] = None;
                self.frames.free(entry.frame);
            }
        }
        Ok(())
    }
}

fn preview(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(64)
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    #[derive(Default)]
    struct FakeStorage {
        blocks: StdHashMap<(String, String, u32), Vec<u8>>,
    }

    impl BlockIo for FakeStorage {
        fn read_block(&mut self, file: &str, tag: &str, block_number: u32) -> Result<Vec<u8>> {
            Ok(self
                .blocks
                .get(&(file.to_string(), tag.to_string(), block_number))
                .cloned()
                .unwrap_or_default())
        }

        fn write_block(&mut self, file: &str, tag: &str, block_number: u32, data: &[u8]) -> Result<()> {
            self.blocks
                .insert((file.to_string(), tag.to_string(), block_number), data.to_vec());
            Ok(())
        }
    }

    fn mm(replacement: ReplacementAlgorithm, frame_count: u32) -> MemoryManager {
        MemoryManager::new(frame_count as usize * 8, 8, Duration::from_millis(0), replacement)
    }

    #[test]
    fn write_then_read_round_trips_within_a_page() {
        let mut io = FakeStorage::default();
        let mut m = mm(ReplacementAlgorithm::Lru, 4);
        m.write(&mut io, "f", "t1", 0, b"hello").unwrap();
        let out = m.read(&mut io, "f", "t1", 0, 5).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn write_spanning_two_pages_sets_dirty_on_both() {
        let mut io = FakeStorage::default();
        let mut m = mm(ReplacementAlgorithm::Lru, 4);
        m.write(&mut io, "f", "t1", 4, &[7u8; 8]).unwrap();
        let table = m.tables.get(&("f".to_string(), "t1".to_string())).unwrap();
        assert!(table.get(0).unwrap().dirty);
        assert!(table.get(1).unwrap().dirty);
    }

    #[test]
    fn lru_evicts_least_recently_touched_page() {
        let mut io = FakeStorage::default();
        let mut m = mm(ReplacementAlgorithm::Lru, 1);
        m.read(&mut io, "f", "a", 0, 1).unwrap();
        m.read(&mut io, "f", "b", 0, 1).unwrap();
        // only one frame exists; "a" must have been evicted to make room for "b"
        let a = m.tables.get(&("f".to_string(), "a".to_string())).unwrap();
        assert!(!a.get(0).unwrap().present);
        let b = m.tables.get(&("f".to_string(), "b".to_string())).unwrap();
        assert!(b.get(0).unwrap().present);
    }

    #[test]
    fn flush_writes_back_dirty_pages_and_clears_dirty_bit() {
        let mut io = FakeStorage::default();
        let mut m = mm(ReplacementAlgorithm::Lru, 4);
        m.write(&mut io, "f", "t1", 0, b"abcdefgh").unwrap();
        m.flush(&mut io, "f", "t1").unwrap();
        assert_eq!(io.blocks.get(&("f".to_string(), "t1".to_string(), 0)).unwrap(), b"abcdefgh");
        let table = m.tables.get(&("f".to_string(), "t1".to_string())).unwrap();
        assert!(!table.get(0).unwrap().dirty);
    }

    #[test]
    fn clock_m_spares_recently_used_pages_on_first_pass() {
        let mut io = FakeStorage::default();
        let mut m = mm(ReplacementAlgorithm::ClockM, 2);
        m.read(&mut io, "f", "a", 0, 1).unwrap();
        m.read(&mut io, "f", "b", 0, 1).unwrap();
        // touch "a" again so its use bit is set before the third page-in
        m.read(&mut io, "f", "a", 0, 1).unwrap();
        m.read(&mut io, "f", "c", 0, 1).unwrap();
        let a = m.tables.get(&("f".to_string(), "a".to_string())).unwrap();
        assert!(a.get(0).unwrap().present);
    }
}
</content>
