//! Helpers over `physical_blocks/block####.dat` files and the hard links
//! that logical blocks hold into them — grounded on
//! `original_source/storage/src/operations/write_block.c`
//! (`create_new_hardlink`) and `commit_tag.c` (`update_logical_block_link`,
//! `free_ph_block_if_unused`, `ph_block_links`).

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::hash_index::physical_block_name;

pub fn physical_block_path(mount_point: &Path, index: usize) -> PathBuf {
    mount_point
        .join("physical_blocks")
        .join(format!("{}.dat", physical_block_name(index)))
}

pub fn logical_block_path(mount_point: &Path, name: &str, tag: &str, block_number: u32) -> PathBuf {
    mount_point
        .join("files")
        .join(name)
        .join(tag)
        .join("logical_blocks")
        .join(format!("{block_number:04}.dat"))
}

/// Number of hard links pointing at the same inode as `path`.
pub fn hard_link_count(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.nlink())
}

/// Replaces the logical block file with a fresh hard link to
/// `physical_blocks/<physical_index>.dat`.
pub fn relink_logical_block(
    mount_point: &Path,
    logical_path: &Path,
    physical_index: usize,
) -> Result<()> {
    std::fs::remove_file(logical_path)?;
    std::fs::hard_link(physical_block_path(mount_point, physical_index), logical_path)?;
    Ok(())
}

/// Frees `physical_index`'s bitmap bit if no logical block still links to
/// it (i.e. the physical file itself is the only remaining reference).
pub fn free_if_unused(
    mount_point: &Path,
    bitmap: &mut crate::bitmap::Bitmap,
    physical_index: usize,
) -> Result<()> {
    let path = physical_block_path(mount_point, physical_index);
    if hard_link_count(&path)? <= 1 {
        bitmap.clear(physical_index)?;
    }
    Ok(())
}
