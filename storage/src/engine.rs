//! The Storage block engine: bitmap, hash index, per-file locks and the
//! CREATE/TAG/TRUNCATE/READ_BLOCK/WRITE_BLOCK/COMMIT/DELETE operations of
//! §4.6, grounded file-for-file on `original_source/storage/src/operations/`.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use md5::{Digest, Md5};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bitmap::Bitmap;
use crate::config::StorageConfig;
use crate::error::{Result, StorageError};
use crate::hash_index::{physical_block_name, HashIndex};
use crate::locks::FileLockRegistry;
use crate::metadata::{FileMetadata, TagState};
use crate::physical;
use crate::superblock::Superblock;

pub const SEED_FILE: &str = "initial_file";
pub const SEED_TAG: &str = "BASE";

pub struct StorageEngine {
    mount_point: PathBuf,
    block_size: u32,
    block_access_delay: Duration,
    bitmap: Mutex<Bitmap>,
    hash_index: Mutex<HashIndex>,
    file_locks: Arc<FileLockRegistry>,
}

impl StorageEngine {
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Opens an already-initialized mount point (the `fresh_start = false`
    /// path): loads the superblock, bitmap and hash index from disk.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let superblock = Superblock::load(&config.mount_point)?;
        let bitmap = Bitmap::load(
            &config.mount_point.join("bitmap.bin"),
            superblock.total_blocks(),
        )?;
        let hash_index = HashIndex::load(&config.mount_point.join("blocks_hash_index.config"))?;
        Ok(Self {
            mount_point: config.mount_point.clone(),
            block_size: superblock.block_size,
            block_access_delay: Duration::from_millis(config.block_access_delay_ms),
            bitmap: Mutex::new(bitmap),
            hash_index: Mutex::new(hash_index),
            file_locks: Arc::new(FileLockRegistry::new()),
        })
    }

    /// Wipes the mount point (bar `superblock.config`) and rebuilds the
    /// bitmap, hash index, physical blocks and the `initial_file:BASE` seed
    /// — grounded on `original_source/storage/src/fresh_start/fresh_start.c`.
    pub fn fresh_start(config: &StorageConfig) -> Result<Self> {
        let mount_point = &config.mount_point;
        std::fs::create_dir_all(mount_point)?;

        for entry in std::fs::read_dir(mount_point)? {
            let entry = entry?;
            if entry.file_name() == "superblock.config" {
                continue;
            }
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(entry.path())?;
            } else {
                std::fs::remove_file(entry.path())?;
            }
        }

        let superblock = Superblock::load(mount_point)?;
        let total_blocks = superblock.total_blocks();

        let mut bitmap = Bitmap::create(&mount_point.join("bitmap.bin"), total_blocks)?;
        let hash_index = HashIndex::create_empty(&mount_point.join("blocks_hash_index.config"))?;

        let physical_dir = mount_point.join("physical_blocks");
        std::fs::create_dir_all(&physical_dir)?;
        let zeroes = vec![0u8; superblock.block_size as usize];
        for i in 0..total_blocks {
            std::fs::write(physical::physical_block_path(mount_point, i), &zeroes)?;
        }

        bitmap.set(0)?;

        let seed_dir = mount_point
            .join("files")
            .join(SEED_FILE)
            .join(SEED_TAG)
            .join("logical_blocks");
        std::fs::create_dir_all(&seed_dir)?;
        std::fs::hard_link(
            physical::physical_block_path(mount_point, 0),
            seed_dir.join("0000.dat"),
        )?;

        let mut seed_metadata = FileMetadata::new_empty(SEED_FILE, SEED_TAG);
        seed_metadata.blocks = vec![0];
        seed_metadata.state = TagState::Committed;
        seed_metadata.save(mount_point)?;

        info!(total_blocks, block_size = superblock.block_size, "fresh_start complete");

        Ok(Self {
            mount_point: mount_point.clone(),
            block_size: superblock.block_size,
            block_access_delay: Duration::from_millis(config.block_access_delay_ms),
            bitmap: Mutex::new(bitmap),
            hash_index: Mutex::new(hash_index),
            file_locks: Arc::new(FileLockRegistry::new()),
        })
    }

    fn tag_dir(&self, name: &str, tag: &str) -> PathBuf {
        self.mount_point.join("files").join(name).join(tag)
    }

    pub fn create(&self, name: &str, tag: &str) -> Result<()> {
        let _guard = self.file_locks.write(name, tag);
        let dir = self.tag_dir(name, tag);
        if dir.exists() {
            return Err(StorageError::FileTagAlreadyExists);
        }
        std::fs::create_dir_all(dir.join("logical_blocks"))?;
        FileMetadata::new_empty(name, tag).save(&self.mount_point)?;
        info!(%name, %tag, "tag created");
        Ok(())
    }

    /// `TAG(src, dst)`: recursively hard-link every logical block from
    /// `src_name:src_tag` into a new `dst_name:dst_tag`.
    pub fn tag(&self, src_name: &str, src_tag: &str, dst_name: &str, dst_tag: &str) -> Result<()> {
        let _src_guard = self.file_locks.read(src_name, src_tag);
        let _dst_guard = self.file_locks.write(dst_name, dst_tag);

        let dst_dir = self.tag_dir(dst_name, dst_tag);
        if dst_dir.exists() {
            return Err(StorageError::FileTagAlreadyExists);
        }
        let src_metadata = FileMetadata::load(&self.mount_point, src_name, src_tag)?;

        std::fs::create_dir_all(dst_dir.join("logical_blocks"))?;
        for (i, &physical_id) in src_metadata.blocks.iter().enumerate() {
            std::fs::hard_link(
                physical::physical_block_path(&self.mount_point, physical_id as usize),
                physical::logical_block_path(&self.mount_point, dst_name, dst_tag, i as u32),
            )?;
        }

        let mut dst_metadata = FileMetadata::new_empty(dst_name, dst_tag);
        dst_metadata.size = src_metadata.size;
        dst_metadata.blocks = src_metadata.blocks;
        dst_metadata.state = TagState::WorkInProgress;
        dst_metadata.save(&self.mount_point)?;

        info!(%src_name, %src_tag, %dst_name, %dst_tag, "tag materialized by hard-link copy");
        Ok(())
    }

    pub fn truncate(&self, name: &str, tag: &str, new_size: u64) -> Result<()> {
        let _guard = self.file_locks.write(name, tag);
        let mut metadata = FileMetadata::load(&self.mount_point, name, tag)?;

        let old_count = metadata.block_count();
        let new_count = ((new_size + self.block_size as u64 - 1) / self.block_size as u64) as usize;

        if new_count == old_count {
            metadata.size = new_size;
            metadata.save(&self.mount_point)?;
            return Ok(());
        }

        if new_count < old_count {
            let mut bitmap = self.bitmap.lock();
            for i in new_count..old_count {
                let logical_path = physical::logical_block_path(&self.mount_point, name, tag, i as u32);
                let physical_id = metadata.blocks[i] as usize;
                std::fs::remove_file(&logical_path)?;
                physical::free_if_unused(&self.mount_point, &mut bitmap, physical_id)?;
            }
            metadata.blocks.truncate(new_count);
        } else {
            for i in old_count..new_count {
                let logical_path = physical::logical_block_path(&self.mount_point, name, tag, i as u32);
                std::fs::hard_link(physical::physical_block_path(&self.mount_point, 0), &logical_path)?;
                metadata.blocks.push(0);
            }
        }

        metadata.size = new_size;
        metadata.save(&self.mount_point)?;
        info!(%name, %tag, old_count, new_count, "truncated");
        Ok(())
    }

    pub fn read_block(&self, name: &str, tag: &str, block_number: u32) -> Result<Vec<u8>> {
        let _guard = self.file_locks.read(name, tag);
        let metadata = FileMetadata::load(&self.mount_point, name, tag)?;
        if block_number as usize >= metadata.block_count() {
            return Err(StorageError::ReadOutOfBounds);
        }

        let path = physical::logical_block_path(&self.mount_point, name, tag, block_number);
        thread::sleep(self.block_access_delay);
        let mut bytes = std::fs::read(path)?;
        bytes.resize(self.block_size as usize, 0);
        debug!(%name, %tag, block_number, "block read");
        Ok(bytes)
    }

    pub fn write_block(&self, name: &str, tag: &str, block_number: u32, data: &[u8]) -> Result<()> {
        let _guard = self.file_locks.write(name, tag);
        let mut metadata = FileMetadata::load(&self.mount_point, name, tag)?;
        if metadata.state == TagState::Committed {
            return Err(StorageError::FileAlreadyCommitted);
        }
        if block_number as usize >= metadata.block_count() {
            return Err(StorageError::ReadOutOfBounds);
        }

        let logical_path = physical::logical_block_path(&self.mount_point, name, tag, block_number);

        // Copy-on-write: more than two hard links means this physical block
        // is shared by at least one other file:tag (the third+ link).
        if physical::hard_link_count(&logical_path)? > 2 {
            let mut bitmap = self.bitmap.lock();
            let free_index = bitmap.first_free().ok_or(StorageError::NotEnoughSpace)?;
            bitmap.set(free_index)?;
            std::fs::remove_file(&logical_path)?;
            std::fs::hard_link(
                physical::physical_block_path(&self.mount_point, free_index),
                &logical_path,
            )?;
            metadata.blocks[block_number as usize] = free_index as u32;
            metadata.save(&self.mount_point)?;
            info!(%name, %tag, block_number, new_physical = free_index, "copy-on-write split");
        }

        let mut padded = data.to_vec();
        padded.resize(self.block_size as usize, 0);
        thread::sleep(self.block_access_delay);
        std::fs::write(&logical_path, &padded)?;
        info!(%name, %tag, block_number, "block written");
        Ok(())
    }

    /// `COMMIT`: deduplicate logical blocks by content hash against
    /// `blocks_hash_index.config`, grounded on `commit_tag.c`
    /// (`deduplicate_blocks`). Idempotent — returns `Ok` unchanged if
    /// already `COMMITTED`.
    pub fn commit(&self, name: &str, tag: &str) -> Result<()> {
        let _guard = self.file_locks.write(name, tag);
        let mut metadata = FileMetadata::load(&self.mount_point, name, tag)?;
        if metadata.state == TagState::Committed {
            info!(%name, %tag, "commit is a no-op, already committed");
            return Ok(());
        }

        if metadata.block_count() == 0 {
            warn!(%name, %tag, "nothing to deduplicate, no logical blocks");
        } else {
            let mut bitmap = self.bitmap.lock();
            let mut hash_index = self.hash_index.lock();

            for i in 0..metadata.block_count() {
                let physical_id = metadata.blocks[i] as usize;
                let logical_path = physical::logical_block_path(&self.mount_point, name, tag, i as u32);
                let content = std::fs::read(&logical_path)?;

                let mut hasher = Md5::new();
                hasher.update(&content);
                let hash = hex::encode(hasher.finalize());

                let current_name = physical_block_name(physical_id);

                match hash_index.get(&hash) {
                    None => {
                        hash_index.register(&hash, &current_name)?;
                        info!(%name, %tag, block = i, physical = %current_name, "hash registered");
                    }
                    Some(canonical) if canonical == current_name => {
                        debug!(%name, %tag, block = i, "already canonical");
                    }
                    Some(canonical) => {
                        let canonical = canonical.to_string();
                        let canonical_id = crate::hash_index::parse_physical_block_name(&canonical)
                            .ok_or(StorageError::CorruptHashIndex)?;
                        physical::relink_logical_block(&self.mount_point, &logical_path, canonical_id)?;
                        metadata.blocks[i] = canonical_id as u32;
                        physical::free_if_unused(&self.mount_point, &mut bitmap, physical_id)?;
                        info!(%name, %tag, block = i, from = %current_name, to = %canonical, "deduplicated");
                    }
                }
            }
        }

        metadata.state = TagState::Committed;
        metadata.save(&self.mount_point)?;
        info!(%name, %tag, "committed");
        Ok(())
    }

    pub fn delete(&self, name: &str, tag: &str) -> Result<()> {
        if name == SEED_FILE && tag == SEED_TAG {
            return Err(StorageError::CannotDeleteSeed);
        }
        let _guard = self.file_locks.write(name, tag);
        let metadata = FileMetadata::load(&self.mount_point, name, tag)?;

        let mut bitmap = self.bitmap.lock();
        for (i, &physical_id) in metadata.blocks.iter().enumerate() {
            let logical_path = physical::logical_block_path(&self.mount_point, name, tag, i as u32);
            std::fs::remove_file(&logical_path)?;
            physical::free_if_unused(&self.mount_point, &mut bitmap, physical_id as usize)?;
        }
        drop(bitmap);

        std::fs::remove_dir_all(self.tag_dir(name, tag))?;
        info!(%name, %tag, "tag deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_in(block_size: u32, total_blocks: u64) -> (tempfile::TempDir, StorageEngine) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("superblock.config"),
            format!("FS_SIZE={}\nBLOCK_SIZE={}\n", block_size as u64 * total_blocks, block_size),
        )
        .unwrap();
        let config = StorageConfig {
            ip: "127.0.0.1".into(),
            port: 0,
            fresh_start: true,
            mount_point: dir.path().to_path_buf(),
            operation_delay_ms: 0,
            block_access_delay_ms: 0,
            log_level: crate::config::LogLevel::Info,
        };
        let engine = StorageEngine::fresh_start(&config).unwrap();
        (dir, engine)
    }

    #[test]
    fn create_write_read_round_trips() {
        let (_dir, engine) = engine_in(8, 16);
        engine.create("f", "t1").unwrap();
        engine.truncate("f", "t1", 8).unwrap();
        engine.write_block("f", "t1", 0, b"hi").unwrap();
        let data = engine.read_block("f", "t1", 0).unwrap();
        assert_eq!(&data[..2], b"hi");
        assert_eq!(data.len(), 8);
    }

    #[test]
    fn write_on_committed_tag_fails() {
        let (_dir, engine) = engine_in(8, 16);
        engine.create("f", "t1").unwrap();
        engine.truncate("f", "t1", 8).unwrap();
        engine.commit("f", "t1").unwrap();
        let err = engine.write_block("f", "t1", 0, b"x").unwrap_err();
        assert!(matches!(err, StorageError::FileAlreadyCommitted));
    }

    #[test]
    fn commit_is_idempotent() {
        let (_dir, engine) = engine_in(8, 16);
        engine.create("f", "t1").unwrap();
        engine.truncate("f", "t1", 8).unwrap();
        engine.commit("f", "t1").unwrap();
        engine.commit("f", "t1").unwrap();
    }

    #[test]
    fn read_out_of_bounds_fails() {
        let (_dir, engine) = engine_in(8, 16);
        engine.create("f", "t1").unwrap();
        let err = engine.read_block("f", "t1", 0).unwrap_err();
        assert!(matches!(err, StorageError::ReadOutOfBounds));
    }

    #[test]
    fn dedup_commit_merges_identical_blocks() {
        let (_dir, engine) = engine_in(8, 16);
        engine.create("f", "t1").unwrap();
        engine.truncate("f", "t1", 16).unwrap();
        engine.write_block("f", "t1", 0, b"samebyte").unwrap();
        engine.write_block("f", "t1", 1, b"samebyte").unwrap();
        engine.commit("f", "t1").unwrap();

        let metadata = FileMetadata::load(&engine.mount_point, "f", "t1").unwrap();
        assert_eq!(metadata.blocks[0], metadata.blocks[1]);
    }

    #[test]
    fn copy_on_write_from_shared_tag() {
        let (_dir, engine) = engine_in(8, 16);
        engine.create("f", "t1").unwrap();
        engine.truncate("f", "t1", 8).unwrap();
        engine.write_block("f", "t1", 0, b"original").unwrap();
        engine.commit("f", "t1").unwrap();

        engine.tag("f", "t1", "f", "t2").unwrap();
        engine.write_block("f", "t2", 0, b"mutated!").unwrap();

        let original = engine.read_block("f", "t1", 0).unwrap();
        assert_eq!(&original, b"original");
        let mutated = engine.read_block("f", "t2", 0).unwrap();
        assert_eq!(&mutated, b"mutated!");
    }

    #[test]
    fn delete_seed_file_fails() {
        let (_dir, engine) = engine_in(8, 16);
        let err = engine.delete(SEED_FILE, SEED_TAG).unwrap_err();
        assert!(matches!(err, StorageError::CannotDeleteSeed));
    }

    #[test]
    fn truncate_reclaims_blocks() {
        let (_dir, engine) = engine_in(8, 16);
        engine.create("f", "t1").unwrap();
        engine.truncate("f", "t1", 32).unwrap();
        for i in 0..4u32 {
            engine.write_block("f", "t1", i, &[i as u8; 4]).unwrap();
        }
        engine.truncate("f", "t1", 16).unwrap();
        let metadata = FileMetadata::load(&engine.mount_point, "f", "t1").unwrap();
        assert_eq!(metadata.block_count(), 2);
        assert_eq!(metadata.size, 16);
        engine.commit("f", "t1").unwrap();
    }
}
