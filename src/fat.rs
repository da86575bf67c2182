//! FAT Manager: an in-memory mirror of the File Allocation Table, loaded at
//! mount from the concatenation of FAT blocks starting at block 1.
//!
//! Each entry is a 16-bit little-endian value: `0xFFFF` FREE, `0xFFFE` EOF,
//! `0xFFFD` BAD/RESERVED, anything else is the index of the next block in
//! the chain. Allocation is first-fit, ascending from `data_start_block`.

use log::{debug, trace, warn};

use crate::block::BlockDevice;
use crate::error::{Error, Result};

pub const FREE: u16 = 0xFFFF;
pub const EOF: u16 = 0xFFFE;
pub const BAD: u16 = 0xFFFD;

pub struct FatManager {
    entries: Vec<u16>,
    fat_start_block: u64,
    fat_blocks: u32,
    data_start_block: u32,
    block_size: usize,
}

impl FatManager {
    /// Loads the FAT mirror from `fat_start_block..fat_start_block+fat_blocks`
    /// of `dev`. `total_blocks` sizes the mirror; any trailing entries beyond
    /// what the FAT blocks hold are left FREE (there should be none in a
    /// well-formed image, since `fat_blocks` is sized to cover them all).
    pub fn load<D: BlockDevice>(
        dev: &D,
        fat_start_block: u64,
        fat_blocks: u32,
        data_start_block: u32,
        total_blocks: u32,
    ) -> Result<Self> {
        let block_size = dev.block_size();
        let mut entries = vec![FREE; total_blocks as usize];
        let entries_per_block = block_size / 2;
        let mut buf = vec![0u8; block_size];
        for i in 0..fat_blocks as u64 {
            dev.read_block(fat_start_block + i, &mut buf)?;
            for slot in 0..entries_per_block {
                let idx = i as usize * entries_per_block + slot;
                if idx >= total_blocks as usize {
                    break;
                }
                let off = slot * 2;
                entries[idx] = u16::from_le_bytes([buf[off], buf[off + 1]]);
            }
        }
        Ok(FatManager {
            entries,
            fat_start_block,
            fat_blocks,
            data_start_block,
            block_size,
        })
    }

    /// Builds a freshly-formatted mirror: all FREE except `[0,
    /// data_start_block)`, which is marked BAD (system area reservation,
    /// invariant 3).
    pub fn new_formatted(total_blocks: u32, fat_start_block: u64, fat_blocks: u32, data_start_block: u32, block_size: usize) -> Self {
        let mut entries = vec![FREE; total_blocks as usize];
        for e in entries.iter_mut().take(data_start_block as usize) {
            *e = BAD;
        }
        FatManager {
            entries,
            fat_start_block,
            fat_blocks,
            data_start_block,
            block_size,
        }
    }

    /// `CorruptChain` if `block` is out of range for this image — a
    /// directory entry's `first_block` is loaded straight off disk and a
    /// corrupt or foreign-written image may hand us garbage.
    pub fn entry(&self, block: u32) -> Result<u16> {
        self.entries
            .get(block as usize)
            .copied()
            .ok_or(Error::CorruptChain)
    }

    /// First-fit scan from `data_start_block` upward for the first FREE
    /// entry. On success marks it EOF and flushes the mirror back to disk.
    pub fn allocate_one<D: BlockDevice>(&mut self, dev: &mut D) -> Result<u32> {
        for block in self.data_start_block..self.entries.len() as u32 {
            if self.entries[block as usize] == FREE {
                self.entries[block as usize] = EOF;
                self.flush_fat(dev)?;
                debug!("fat: allocated block {}", block);
                return Ok(block);
            }
        }
        Err(Error::NoSpace)
    }

    /// Walks `head`'s chain, freeing every block, bounded by `total_blocks`
    /// hops to convert a cyclic/corrupt image into `CorruptChain` rather
    /// than looping forever.
    pub fn free_chain<D: BlockDevice>(&mut self, dev: &mut D, head: u32) -> Result<()> {
        if head == EOF as u32 {
            return Ok(());
        }
        let mut cur = head;
        let limit = self.entries.len();
        for _ in 0..limit {
            if cur as usize >= self.entries.len() {
                warn!("fat: chain from {} referenced out-of-range block {}", head, cur);
                return Err(Error::CorruptChain);
            }
            let next = self.entries[cur as usize];
            self.entries[cur as usize] = FREE;
            trace!("fat: freed block {}", cur);
            if next == EOF {
                self.flush_fat(dev)?;
                return Ok(());
            }
            if next == FREE || next == BAD {
                warn!("fat: chain from {} hit a free/bad block mid-walk", head);
                return Err(Error::CorruptChain);
            }
            cur = next as u32;
        }
        warn!("fat: chain from {} exceeded {} hops, treating as cyclic", head, limit);
        Err(Error::CorruptChain)
    }

    /// Sets `fat[prev] = next`. Callers batch multiple links and call
    /// `flush_fat` once.
    pub fn link(&mut self, prev: u32, next: u32) {
        self.entries[prev as usize] = next as u16;
    }

    pub fn set_eof(&mut self, block: u32) {
        self.entries[block as usize] = EOF;
    }

    /// Returns the n-th block (0-indexed) in the chain starting at `head`,
    /// or `CorruptChain` if the chain ends first.
    pub fn walk(&self, head: u32, n: u32) -> Result<u32> {
        let mut cur = head;
        let limit = self.entries.len() as u32;
        if cur >= limit {
            return Err(Error::CorruptChain);
        }
        for _ in 0..n {
            if cur == EOF as u32 {
                return Err(Error::CorruptChain);
            }
            let next = self.entries[cur as usize];
            if next == FREE || next == BAD {
                return Err(Error::CorruptChain);
            }
            cur = next as u32;
            if cur >= limit {
                return Err(Error::CorruptChain);
            }
        }
        Ok(cur)
    }

    /// Number of entries currently FREE; used by tests validating space
    /// conservation across matched create/write/delete triples.
    pub fn free_blocks_count(&self) -> usize {
        self.entries.iter().filter(|&&e| e == FREE).count()
    }

    /// Writes every FAT block back unconditionally. A dirty-tracking
    /// optimization is allowed but not required.
    pub fn flush_fat<D: BlockDevice>(&mut self, dev: &mut D) -> Result<()> {
        let entries_per_block = self.block_size / 2;
        let mut buf = vec![0u8; self.block_size];
        for i in 0..self.fat_blocks as u64 {
            buf.fill(0);
            for slot in 0..entries_per_block {
                let idx = i as usize * entries_per_block + slot;
                if idx >= self.entries.len() {
                    break;
                }
                let off = slot * 2;
                buf[off..off + 2].copy_from_slice(&self.entries[idx].to_le_bytes());
            }
            dev.write_block(self.fat_start_block + i, &buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::FileBlockDevice;
    use tempfile::NamedTempFile;

    fn fresh(total_blocks: u32) -> (NamedTempFile, FileBlockDevice, FatManager) {
        let tmp = NamedTempFile::new().unwrap();
        let dev = FileBlockDevice::create(tmp.path(), 64, total_blocks as u64).unwrap();
        let fat = FatManager::new_formatted(total_blocks, 1, 1, 4, 64);
        (tmp, dev, fat)
    }

    #[test]
    fn allocates_first_fit_ascending() {
        let (_tmp, mut dev, mut fat) = fresh(16);
        let a = fat.allocate_one(&mut dev).unwrap();
        let b = fat.allocate_one(&mut dev).unwrap();
        assert_eq!(a, 4);
        assert_eq!(b, 5);
        assert_eq!(fat.entry(a).unwrap(), EOF);
    }

    #[test]
    fn never_allocates_below_data_start() {
        let (_tmp, mut dev, mut fat) = fresh(16);
        for _ in 0..12 {
            let b = fat.allocate_one(&mut dev).unwrap();
            assert!(b >= 4);
        }
        assert!(matches!(fat.allocate_one(&mut dev), Err(Error::NoSpace)));
    }

    #[test]
    fn free_chain_restores_free_count() {
        let (_tmp, mut dev, mut fat) = fresh(16);
        let before = fat.free_blocks_count();
        let a = fat.allocate_one(&mut dev).unwrap();
        let b = fat.allocate_one(&mut dev).unwrap();
        fat.link(a, b);
        fat.set_eof(b);
        fat.flush_fat(&mut dev).unwrap();
        fat.free_chain(&mut dev, a).unwrap();
        assert_eq!(fat.free_blocks_count(), before);
    }

    #[test]
    fn detects_cyclic_chain_as_corrupt() {
        let (_tmp, mut dev, mut fat) = fresh(8);
        fat.link(4, 5);
        fat.link(5, 4);
        assert!(matches!(fat.free_chain(&mut dev, 4), Err(Error::CorruptChain)));
    }

    #[test]
    fn walk_returns_nth_block() {
        let (_tmp, mut dev, mut fat) = fresh(16);
        let a = fat.allocate_one(&mut dev).unwrap();
        let b = fat.allocate_one(&mut dev).unwrap();
        let c = fat.allocate_one(&mut dev).unwrap();
        fat.link(a, b);
        fat.link(b, c);
        fat.set_eof(c);
        assert_eq!(fat.walk(a, 0).unwrap(), a);
        assert_eq!(fat.walk(a, 1).unwrap(), b);
        assert_eq!(fat.walk(a, 2).unwrap(), c);
        assert!(fat.walk(a, 3).is_err());
    }

    #[test]
    fn reloads_from_disk_round_trip() {
        let tmp = NamedTempFile::new().unwrap();
        let mut dev = FileBlockDevice::create(tmp.path(), 64, 16).unwrap();
        let mut fat = FatManager::new_formatted(16, 1, 1, 4, 64);
        let a = fat.allocate_one(&mut dev).unwrap();
        let b = fat.allocate_one(&mut dev).unwrap();
        fat.link(a, b);
        fat.set_eof(b);
        fat.flush_fat(&mut dev).unwrap();

        let reloaded = FatManager::load(&dev, 1, 1, 4, 16).unwrap();
        assert_eq!(reloaded.entry(a).unwrap(), b as u16);
        assert_eq!(reloaded.entry(b).unwrap(), EOF);
        assert_eq!(reloaded.entry(0).unwrap(), BAD);
    }

    #[test]
    fn free_chain_rejects_out_of_range_head_instead_of_panicking() {
        let (_tmp, mut dev, mut fat) = fresh(8);
        assert!(matches!(
            fat.free_chain(&mut dev, 99),
            Err(Error::CorruptChain)
        ));
    }

    #[test]
    fn walk_rejects_out_of_range_head_instead_of_panicking() {
        let (_tmp, _dev, fat) = fresh(8);
        assert!(matches!(fat.walk(99, 1), Err(Error::CorruptChain)));
    }

    #[test]
    fn entry_rejects_out_of_range_block() {
        let (_tmp, _dev, fat) = fresh(8);
        assert!(matches!(fat.entry(99), Err(Error::CorruptChain)));
    }
}
