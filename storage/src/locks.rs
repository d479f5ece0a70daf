//! Reader/writer lock registry keyed by `"name:tag"`, materialized on first
//! acquire and reclaimed on last release — grounded on
//! `original_source/storage/src/file_locks.c` (`lock_file`/`unlock_file`,
//! a `pthread_rwlock_t` + `ref_count` behind a dictionary mutex).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};

struct Entry {
    lock: Arc<RwLock<()>>,
    ref_count: usize,
}

/// Owns one `RwLock<()>` per live `"name:tag"` key. Always used behind an
/// `Arc` so the returned guards can outlive the call that acquired them and
/// release their registry slot on drop.
pub struct FileLockRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl FileLockRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(name: &str, tag: &str) -> String {
        format!("{name}:{tag}")
    }

    fn handle(&self, key: &str) -> Arc<RwLock<()>> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            lock: Arc::new(RwLock::new(())),
            ref_count: 0,
        });
        entry.ref_count += 1;
        entry.lock.clone()
    }

    fn release(&self, key: &str) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.ref_count -= 1;
            if entry.ref_count == 0 {
                entries.remove(key);
            }
        }
    }

    pub fn read(self: &Arc<Self>, name: &str, tag: &str) -> FileReadGuard {
        let key = Self::key(name, tag);
        let handle = self.handle(&key);
        FileReadGuard {
            guard: handle.read_arc(),
            registry: self.clone(),
            key,
        }
    }

    pub fn write(self: &Arc<Self>, name: &str, tag: &str) -> FileWriteGuard {
        let key = Self::key(name, tag);
        let handle = self.handle(&key);
        FileWriteGuard {
            guard: handle.write_arc(),
            registry: self.clone(),
            key,
        }
    }
}

impl Default for FileLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A held read lock on one `name:tag`. Dropping it releases the registry's
/// reference count, reclaiming the entry once nobody else holds it.
pub struct FileReadGuard {
    guard: ArcRwLockReadGuard<RawRwLock, ()>,
    registry: Arc<FileLockRegistry>,
    key: String,
}

pub struct FileWriteGuard {
    guard: ArcRwLockWriteGuard<RawRwLock, ()>,
    registry: Arc<FileLockRegistry>,
    key: String,
}

impl Drop for FileReadGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

impl Drop for FileWriteGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn writers_are_exclusive() {
        let registry = Arc::new(FileLockRegistry::new());
        let counter = Arc::new(Mutex::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                let _guard = registry.write("f", "t1");
                let mut c = counter.lock();
                let seen = *c;
                *c += 1;
                assert_eq!(seen, *c - 1);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8);
    }

    #[test]
    fn readers_do_not_block_each_other() {
        let registry = Arc::new(FileLockRegistry::new());
        let r1 = registry.read("f", "t1");
        let r2 = registry.read("f", "t1");
        drop(r1);
        drop(r2);
    }

    #[test]
    fn entry_is_reclaimed_after_last_release() {
        let registry = Arc::new(FileLockRegistry::new());
        {
            let _g = registry.write("f", "t1");
            assert_eq!(registry.entries.lock().len(), 1);
        }
        assert_eq!(registry.entries.lock().len(), 0);
    }
}
