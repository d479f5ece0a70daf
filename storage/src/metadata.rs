//! `files/<name>/<tag>/metadata.config`: `SIZE=`, `BLOCKS=[...]`, `ESTADO=`.
//!
//! Grounded on `original_source/storage/src/utils/filesystem_utils.c`
//! (`create_metadata_file`'s default content) and the `metadata.blocks`
//! mutations throughout `commit_tag.c` / `write_block.c` / `truncate_file.c`.

use std::path::{Path, PathBuf};

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    WorkInProgress,
    Committed,
}

impl TagState {
    fn as_str(self) -> &'static str {
        match self {
            Self::WorkInProgress => "WORK_IN_PROGRESS",
            Self::Committed => "COMMITTED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "WORK_IN_PROGRESS" => Some(Self::WorkInProgress),
            "COMMITTED" => Some(Self::Committed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub name: String,
    pub tag: String,
    pub size: u64,
    pub blocks: Vec<u32>,
    pub state: TagState,
}

impl FileMetadata {
    pub fn new_empty(name: &str, tag: &str) -> Self {
        Self {
            name: name.to_string(),
            tag: tag.to_string(),
            size: 0,
            blocks: Vec::new(),
            state: TagState::WorkInProgress,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn path(mount_point: &Path, name: &str, tag: &str) -> PathBuf {
        mount_point
            .join("files")
            .join(name)
            .join(tag)
            .join("metadata.config")
    }

    pub fn load(mount_point: &Path, name: &str, tag: &str) -> Result<Self> {
        let path = Self::path(mount_point, name, tag);
        let raw = std::fs::read_to_string(&path).map_err(|_| StorageError::FileTagMissing)?;

        let err = || StorageError::MalformedMetadata(name.to_string(), tag.to_string());

        let mut size = None;
        let mut blocks = None;
        let mut state = None;
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(err)?;
            match key.trim() {
                "SIZE" => size = Some(value.trim().parse::<u64>().map_err(|_| err())?),
                "BLOCKS" => {
                    let inner = value.trim().trim_start_matches('[').trim_end_matches(']');
                    let parsed = if inner.is_empty() {
                        Vec::new()
                    } else {
                        inner
                            .split(',')
                            .map(|s| s.trim().parse::<u32>().map_err(|_| err()))
                            .collect::<Result<Vec<_>>>()?
                    };
                    blocks = Some(parsed);
                }
                "ESTADO" => state = Some(TagState::parse(value.trim()).ok_or_else(err)?),
                _ => {}
            }
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
            size: size.ok_or_else(err)?,
            blocks: blocks.ok_or_else(err)?,
            state: state.ok_or_else(err)?,
        })
    }

    pub fn save(&self, mount_point: &Path) -> Result<()> {
        let path = Self::path(mount_point, &self.name, &self.tag);
        let blocks_str = self
            .blocks
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let content = format!(
            "SIZE={}\nBLOCKS=[{}]\nESTADO={}\n",
            self.size,
            blocks_str,
            self.state.as_str()
        );
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("files/f/t1")).unwrap();

        let mut metadata = FileMetadata::new_empty("f", "t1");
        metadata.size = 128;
        metadata.blocks = vec![3, 4];
        metadata.state = TagState::Committed;
        metadata.save(dir.path()).unwrap();

        let reloaded = FileMetadata::load(dir.path(), "f", "t1").unwrap();
        assert_eq!(reloaded.size, 128);
        assert_eq!(reloaded.blocks, vec![3, 4]);
        assert_eq!(reloaded.state, TagState::Committed);
    }

    #[test]
    fn missing_tag_is_file_tag_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileMetadata::load(dir.path(), "f", "ghost").unwrap_err();
        assert!(matches!(err, StorageError::FileTagMissing));
    }
}
