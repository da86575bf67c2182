//! File Engine: combines the FAT Manager and Directory Engine to implement
//! create, delete, read-all, overwrite-write, and truncate-to-smaller on
//! regular files, plus `mkdir` for subdirectories.

use log::{debug, info};

use crate::block::BlockDevice;
use crate::config;
use crate::dir::{DirEntry, Directory, FILE_TYPE_DIR, FILE_TYPE_FILE};
use crate::error::{Error, Result};
use crate::fat::{FatManager, EOF};

/// Geometry needed by every operation below, carried alongside the FAT
/// mirror rather than re-derived from the boot sector each call.
#[derive(Clone, Copy)]
pub struct Geometry {
    pub block_size: usize,
    pub entries_per_dir_block: usize,
    pub max_filename: usize,
    pub max_file_blocks: u32,
}

pub fn read_dir_block<D: BlockDevice>(dev: &D, block: u32, geo: Geometry) -> Result<Directory> {
    let mut buf = vec![0u8; geo.block_size];
    dev.read_block(block as u64, &mut buf)?;
    Ok(Directory::decode(&buf, geo.entries_per_dir_block, geo.max_filename))
}

pub fn write_dir_block<D: BlockDevice>(dev: &mut D, block: u32, dir: &Directory, geo: Geometry) -> Result<()> {
    let buf = dir.encode(geo.block_size);
    dev.write_block(block as u64, &buf)
}

fn check_name(name: &str, max_filename: usize) -> Result<()> {
    if name.len() >= max_filename {
        return Err(Error::NameTooLong);
    }
    Ok(())
}

/// `create_file(cwd, name)`. Rejects too-long or duplicate names;
/// otherwise inserts an empty file entry (`first_block = EOF`). No block
/// allocation happens until the first `write_file`.
pub fn create_file<D: BlockDevice>(
    dev: &mut D,
    cwd: u32,
    name: &str,
    now: u32,
    geo: Geometry,
) -> Result<()> {
    check_name(name, geo.max_filename)?;
    let mut dir = read_dir_block(dev, cwd, geo)?;
    if dir.find(name).is_some() {
        return Err(Error::AlreadyExists);
    }
    dir.insert(DirEntry {
        filename: name.to_string(),
        file_size: 0,
        first_block: EOF,
        entry_type: FILE_TYPE_FILE,
        created_time: now,
        modified_time: now,
        attributes: 0,
    })?;
    write_dir_block(dev, cwd, &dir, geo)?;
    debug!("file: created '{}' in dir block {}", name, cwd);
    Ok(())
}

/// `delete_file(cwd, name)`. Frees the chain (if any) before clearing the
/// directory entry, so a crash between the two leaves an orphaned-but-freed
/// chain rather than a dangling entry.
pub fn delete_file<D: BlockDevice>(dev: &mut D, fat: &mut FatManager, cwd: u32, name: &str, geo: Geometry) -> Result<()> {
    let mut dir = read_dir_block(dev, cwd, geo)?;
    let slot = dir.find(name).ok_or(Error::NotFound)?;
    if !dir.entries[slot].is_file() {
        return Err(Error::NotAFile);
    }
    let first_block = dir.entries[slot].first_block;
    if first_block != EOF {
        fat.free_chain(dev, first_block as u32)?;
    }
    dir.remove(slot);
    write_dir_block(dev, cwd, &dir, geo)?;
    info!("file: deleted '{}' from dir block {}", name, cwd);
    Ok(())
}

/// `write_file(cwd, name, payload)` — full overwrite. Preserves the
/// documented free-before-allocate ordering: on `NoSpace` mid-allocation,
/// the newly-built partial chain is rolled back but the file's previous
/// content (already freed in step 1) is not recovered — the write leaves
/// the file empty, not reverted.
pub fn write_file<D: BlockDevice>(
    dev: &mut D,
    fat: &mut FatManager,
    cwd: u32,
    name: &str,
    payload: &[u8],
    now: u32,
    geo: Geometry,
) -> Result<()> {
    if payload.len() as u64 > geo.max_file_blocks as u64 * geo.block_size as u64 {
        return Err(Error::TooLarge);
    }
    let mut dir = read_dir_block(dev, cwd, geo)?;
    let slot = dir.find(name).ok_or(Error::NotFound)?;
    if !dir.entries[slot].is_file() {
        return Err(Error::NotAFile);
    }

    let old_first_block = dir.entries[slot].first_block;
    if old_first_block != EOF {
        fat.free_chain(dev, old_first_block as u32)?;
    }

    let mut first_block: Option<u32> = None;
    let mut prev: Option<u32> = None;
    let mut built = Vec::new();

    let result = (|| -> Result<()> {
        for chunk in payload.chunks(geo.block_size) {
            let block = fat.allocate_one(dev)?;
            built.push(block);
            if first_block.is_none() {
                first_block = Some(block);
            }
            if let Some(p) = prev {
                fat.link(p, block);
            }
            prev = Some(block);

            let mut buf = vec![0u8; geo.block_size];
            buf[..chunk.len()].copy_from_slice(chunk);
            dev.write_block(block as u64, &buf)?;
        }
        Ok(())
    })();

    if let Err(e) = result {
        // Links between `built` blocks were already set by `fat.link` above;
        // only the tail needs an EOF terminator before `free_chain` can walk
        // and free the whole partial chain. Setting *every* built block to
        // EOF here would sever those links and leak all but the head.
        if let Some(&last) = built.last() {
            fat.set_eof(last);
        }
        if let Some(&head) = built.first() {
            let _ = fat.free_chain(dev, head);
        } else {
            let _ = fat.flush_fat(dev);
        }
        return Err(e);
    }

    if let Some(last) = prev {
        fat.set_eof(last);
    }
    fat.flush_fat(dev)?;

    dir.entries[slot].first_block = first_block.unwrap_or(EOF as u32) as u16;
    dir.entries[slot].file_size = payload.len() as u32;
    dir.entries[slot].modified_time = now;
    write_dir_block(dev, cwd, &dir, geo)?;
    debug!(
        "file: wrote {} bytes to '{}' ({} blocks)",
        payload.len(),
        name,
        built.len()
    );
    Ok(())
}

/// `read_file(cwd, name)`. Walks the chain, copying
/// `min(remaining, block_size)` bytes from each block until `file_size`
/// bytes are collected.
pub fn read_file<D: BlockDevice>(dev: &D, fat: &FatManager, cwd: u32, name: &str, geo: Geometry) -> Result<Vec<u8>> {
    let dir = read_dir_block(dev, cwd, geo)?;
    let slot = dir.find(name).ok_or(Error::NotFound)?;
    let entry = &dir.entries[slot];
    if !entry.is_file() {
        return Err(Error::NotAFile);
    }
    if entry.file_size == 0 {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(entry.file_size as usize);
    let mut remaining = entry.file_size as usize;
    let mut cur = entry.first_block as u32;
    let mut buf = vec![0u8; geo.block_size];
    loop {
        if cur == EOF as u32 {
            return Err(Error::CorruptChain);
        }
        dev.read_block(cur as u64, &mut buf)?;
        let take = remaining.min(geo.block_size);
        out.extend_from_slice(&buf[..take]);
        remaining -= take;
        if remaining == 0 {
            break;
        }
        let next = fat.entry(cur)?;
        if next == crate::fat::FREE || next == crate::fat::BAD {
            return Err(Error::CorruptChain);
        }
        cur = next as u32;
    }
    Ok(out)
}

/// `truncate_file(cwd, name, new_size)`. Only shrinks; `new_size >
/// file_size` is `CannotGrow`.
pub fn truncate_file<D: BlockDevice>(
    dev: &mut D,
    fat: &mut FatManager,
    cwd: u32,
    name: &str,
    new_size: u32,
    now: u32,
    geo: Geometry,
) -> Result<()> {
    let mut dir = read_dir_block(dev, cwd, geo)?;
    let slot = dir.find(name).ok_or(Error::NotFound)?;
    if !dir.entries[slot].is_file() {
        return Err(Error::NotAFile);
    }
    let file_size = dir.entries[slot].file_size;
    if new_size > file_size {
        return Err(Error::CannotGrow);
    }
    if new_size == file_size {
        return Ok(());
    }

    let first_block = dir.entries[slot].first_block as u32;
    let blocks_needed = ((new_size as u64 + geo.block_size as u64 - 1) / geo.block_size as u64) as u32;

    if blocks_needed == 0 {
        fat.free_chain(dev, first_block)?;
        dir.entries[slot].first_block = EOF;
    } else {
        let last_kept = fat.walk(first_block, blocks_needed - 1)?;
        let first_drop = fat.entry(last_kept)?;
        fat.set_eof(last_kept);
        if first_drop != crate::fat::EOF {
            fat.free_chain(dev, first_drop as u32)?;
        } else {
            fat.flush_fat(dev)?;
        }
    }

    dir.entries[slot].file_size = new_size;
    dir.entries[slot].modified_time = now;
    write_dir_block(dev, cwd, &dir, geo)?;
    debug!("file: truncated '{}' to {} bytes", name, new_size);
    Ok(())
}

/// `mkdir(cwd, name)`.
pub fn mkdir<D: BlockDevice>(
    dev: &mut D,
    fat: &mut FatManager,
    cwd: u32,
    name: &str,
    now: u32,
    geo: Geometry,
) -> Result<u32> {
    check_name(name, geo.max_filename)?;
    let mut dir = read_dir_block(dev, cwd, geo)?;
    if dir.find(name).is_some() {
        return Err(Error::AlreadyExists);
    }
    if dir.find_free_slot().is_none() {
        return Err(Error::DirectoryFull);
    }

    let new_block = fat.allocate_one(dev)?;
    let mut new_dir = Directory::empty(geo.entries_per_dir_block, geo.max_filename);
    new_dir.init_subdir(new_block, cwd);
    write_dir_block(dev, new_block, &new_dir, geo)?;

    dir.insert(DirEntry {
        filename: name.to_string(),
        file_size: 0,
        first_block: new_block as u16,
        entry_type: FILE_TYPE_DIR,
        created_time: now,
        modified_time: now,
        attributes: 0,
    })?;
    write_dir_block(dev, cwd, &dir, geo)?;
    info!("file: created subdirectory '{}' at block {}", name, new_block);
    Ok(new_block)
}

/// Listing helper for `ls`: the authoritative, non-empty entries of `cwd`.
pub fn list_dir<D: BlockDevice>(dev: &D, cwd: u32, geo: Geometry) -> Result<Vec<DirEntry>> {
    let dir = read_dir_block(dev, cwd, geo)?;
    Ok(dir.iter_occupied().cloned().collect())
}

pub fn entries_per_dir_block_matches(geo: Geometry) -> bool {
    geo.entries_per_dir_block * config::DIR_ENTRY_SIZE + 2 <= geo.block_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FileBlockDevice;
    use tempfile::NamedTempFile;

    fn geo() -> Geometry {
        // `config::DIR_ENTRY_SIZE` (used by `Directory::encode`/`decode`'s
        // stride) is derived from the fixed `config::MAX_FILENAME_SIZE`, so
        // `max_filename` here must match it or entries decode misaligned.
        Geometry {
            block_size: 1024,
            entries_per_dir_block: 2,
            max_filename: config::MAX_FILENAME_SIZE,
            max_file_blocks: 65535,
        }
    }

    /// A corrupt or foreign-written image can record a `first_block` past
    /// the end of this image's FAT (e.g. copied from a larger image). Every
    /// operation that walks a chain from such a value must surface
    /// `CorruptChain`, never panic on an out-of-range index.
    fn corrupt_file_dir<D: BlockDevice>(dev: &mut D, cwd: u32) -> Geometry {
        let geo = geo();
        let mut dir = Directory::empty(geo.entries_per_dir_block, geo.max_filename);
        dir.insert(DirEntry {
            filename: "broken".into(),
            file_size: 10,
            first_block: 9_999,
            entry_type: FILE_TYPE_FILE,
            created_time: 0,
            modified_time: 0,
            attributes: 0,
        })
        .unwrap();
        write_dir_block(dev, cwd, &dir, geo).unwrap();
        geo
    }

    #[test]
    fn read_file_rejects_out_of_range_first_block_without_panicking() {
        let tmp = NamedTempFile::new().unwrap();
        let mut dev = FileBlockDevice::create(tmp.path(), 1024, 8).unwrap();
        let geo = corrupt_file_dir(&mut dev, 0);
        let fat = FatManager::new_formatted(8, 1, 1, 2, 1024);
        // The out-of-range block number is caught by the block device's own
        // bounds check before the FAT mirror is ever consulted — an `Io`
        // error rather than `CorruptChain`, but an error either way, never
        // a panic.
        assert!(read_file(&dev, &fat, 0, "broken", geo).is_err());
    }

    #[test]
    fn delete_file_rejects_out_of_range_first_block_as_corrupt_chain() {
        let tmp = NamedTempFile::new().unwrap();
        let mut dev = FileBlockDevice::create(tmp.path(), 1024, 8).unwrap();
        let geo = corrupt_file_dir(&mut dev, 0);
        let mut fat = FatManager::new_formatted(8, 1, 1, 2, 1024);
        assert!(matches!(
            delete_file(&mut dev, &mut fat, 0, "broken", geo),
            Err(Error::CorruptChain)
        ));
    }

    #[test]
    fn truncate_file_rejects_out_of_range_first_block_as_corrupt_chain() {
        let tmp = NamedTempFile::new().unwrap();
        let mut dev = FileBlockDevice::create(tmp.path(), 1024, 8).unwrap();
        let geo = corrupt_file_dir(&mut dev, 0);
        let mut fat = FatManager::new_formatted(8, 1, 1, 2, 1024);
        assert!(matches!(
            truncate_file(&mut dev, &mut fat, 0, "broken", 1, 0, geo),
            Err(Error::CorruptChain)
        ));
    }
}
