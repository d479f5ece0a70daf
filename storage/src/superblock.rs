//! `superblock.config`: total filesystem size and block size, grounded on
//! `original_source/storage/src/storage_utils.c` (`read_superblock`).

use std::path::Path;

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub fs_size: u64,
    pub block_size: u32,
}

impl Superblock {
    pub fn total_blocks(&self) -> usize {
        (self.fs_size / self.block_size as u64) as usize
    }

    pub fn path(mount_point: &Path) -> std::path::PathBuf {
        mount_point.join("superblock.config")
    }

    pub fn load(mount_point: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(Self::path(mount_point))?;
        let mut fs_size = None;
        let mut block_size = None;
        for line in raw.lines() {
            let line = line.trim();
            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "FS_SIZE" => {
                        fs_size = Some(value.trim().parse().map_err(|_| StorageError::MalformedSuperblock)?)
                    }
                    "BLOCK_SIZE" => {
                        block_size =
                            Some(value.trim().parse().map_err(|_| StorageError::MalformedSuperblock)?)
                    }
                    _ => {}
                }
            }
        }
        Ok(Self {
            fs_size: fs_size.ok_or(StorageError::MalformedSuperblock)?,
            block_size: block_size.ok_or(StorageError::MalformedSuperblock)?,
        })
    }

    pub fn save(&self, mount_point: &Path) -> Result<()> {
        let content = format!("FS_SIZE={}\nBLOCK_SIZE={}\n", self.fs_size, self.block_size);
        std::fs::write(Self::path(mount_point), content)?;
        Ok(())
    }
}
