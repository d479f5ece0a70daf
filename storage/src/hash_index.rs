//! `blocks_hash_index.config`: content hash → canonical physical block,
//! grounded on `original_source/storage/src/operations/commit_tag.c`
//! (`deduplicate_blocks`), which persists this as `hash = block####` lines.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub struct HashIndex {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl HashIndex {
    pub fn create_empty(path: &Path) -> Result<Self> {
        std::fs::write(path, "")?;
        Ok(Self {
            path: path.to_path_buf(),
            entries: BTreeMap::new(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut entries = BTreeMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((hash, block)) = line.split_once('=') {
                entries.insert(hash.trim().to_string(), block.trim().to_string());
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    fn persist(&self) -> Result<()> {
        let mut out = String::new();
        for (hash, block) in &self.entries {
            out.push_str(hash);
            out.push_str(" = ");
            out.push_str(block);
            out.push('\n');
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }

    /// Physical block name (`block####`) registered for this content hash.
    pub fn get(&self, hash: &str) -> Option<&str> {
        self.entries.get(hash).map(String::as_str)
    }

    pub fn register(&mut self, hash: &str, physical_block: &str) -> Result<()> {
        self.entries.insert(hash.to_string(), physical_block.to_string());
        self.persist()
    }
}

pub fn physical_block_name(index: usize) -> String {
    format!("block{index:04}")
}

pub fn parse_physical_block_name(name: &str) -> Option<usize> {
    name.strip_prefix("block")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks_hash_index.config");
        let mut index = HashIndex::create_empty(&path).unwrap();
        index.register("abc123", "block0007").unwrap();

        let reloaded = HashIndex::load(&path).unwrap();
        assert_eq!(reloaded.get("abc123"), Some("block0007"));
        assert_eq!(reloaded.get("missing"), None);
    }

    #[test]
    fn physical_block_name_formats_four_digits() {
        assert_eq!(physical_block_name(7), "block0007");
        assert_eq!(parse_physical_block_name("block0007"), Some(7));
        assert_eq!(parse_physical_block_name("garbage"), None);
    }
}
