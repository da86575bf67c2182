//! Directory Engine: reads/writes a single directory block, interpreted as
//! a fixed array of `DirEntry` slots followed by a trailing `entry_count`.
//!
//! Per DESIGN.md (Open Question resolved as option (a)), a directory never
//! spans more than one block: `entries_per_block` is derived at format time
//! from `block_size` and `MAX_FILENAME_SIZE` so the array plus its count
//! always fits.

use log::{debug, trace};

use crate::config::DIR_ENTRY_SIZE;
use crate::error::{Error, Result};
use crate::fat::EOF;

pub const FILE_TYPE_FILE: u8 = 0;
pub const FILE_TYPE_DIR: u8 = 1;

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub filename: String,
    pub file_size: u32,
    pub first_block: u16,
    pub entry_type: u8,
    pub created_time: u32,
    pub modified_time: u32,
    pub attributes: u8,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.entry_type == FILE_TYPE_DIR
    }

    pub fn is_file(&self) -> bool {
        self.entry_type == FILE_TYPE_FILE
    }

    fn empty() -> Self {
        DirEntry {
            filename: String::new(),
            file_size: 0,
            first_block: EOF,
            entry_type: FILE_TYPE_FILE,
            created_time: 0,
            modified_time: 0,
            attributes: 0,
        }
    }

    fn encode(&self, max_filename: usize, buf: &mut [u8]) {
        buf.fill(0);
        let name = self.filename.as_bytes();
        let n = name.len().min(max_filename - 1);
        buf[0..n].copy_from_slice(&name[..n]);
        // byte after the name (or at max_filename-1) stays NUL from the fill
        buf[max_filename..max_filename + 4].copy_from_slice(&self.file_size.to_le_bytes());
        buf[max_filename + 4..max_filename + 6].copy_from_slice(&self.first_block.to_le_bytes());
        buf[max_filename + 6] = self.entry_type;
        buf[max_filename + 7..max_filename + 11].copy_from_slice(&self.created_time.to_le_bytes());
        buf[max_filename + 11..max_filename + 15].copy_from_slice(&self.modified_time.to_le_bytes());
        buf[max_filename + 15] = self.attributes;
    }

    fn decode(max_filename: usize, buf: &[u8]) -> Self {
        let nul = buf[0..max_filename].iter().position(|&b| b == 0).unwrap_or(max_filename);
        let filename = String::from_utf8_lossy(&buf[0..nul]).into_owned();
        let file_size = u32::from_le_bytes(buf[max_filename..max_filename + 4].try_into().unwrap());
        let first_block = u16::from_le_bytes(buf[max_filename + 4..max_filename + 6].try_into().unwrap());
        let entry_type = buf[max_filename + 6];
        let created_time = u32::from_le_bytes(buf[max_filename + 7..max_filename + 11].try_into().unwrap());
        let modified_time = u32::from_le_bytes(buf[max_filename + 11..max_filename + 15].try_into().unwrap());
        let attributes = buf[max_filename + 15];
        DirEntry {
            filename,
            file_size,
            first_block,
            entry_type,
            created_time,
            modified_time,
            attributes,
        }
    }
}

/// The decoded contents of one directory block.
pub struct Directory {
    pub entries: Vec<DirEntry>,
    /// As persisted; a hint, not authoritative. Lookups always scan every
    /// slot rather than trusting this count.
    pub entry_count: u16,
    max_filename: usize,
}

impl Directory {
    /// An all-empty directory block sized for `capacity` entries.
    pub fn empty(capacity: usize, max_filename: usize) -> Self {
        Directory {
            entries: (0..capacity).map(|_| DirEntry::empty()).collect(),
            entry_count: 0,
            max_filename,
        }
    }

    pub fn decode(buf: &[u8], capacity: usize, max_filename: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let off = i * DIR_ENTRY_SIZE;
            entries.push(DirEntry::decode(max_filename, &buf[off..off + DIR_ENTRY_SIZE]));
        }
        let count_off = capacity * DIR_ENTRY_SIZE;
        let entry_count = u16::from_le_bytes(buf[count_off..count_off + 2].try_into().unwrap());
        Directory {
            entries,
            entry_count,
            max_filename,
        }
    }

    pub fn encode(&self, block_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; block_size];
        for (i, e) in self.entries.iter().enumerate() {
            let off = i * DIR_ENTRY_SIZE;
            e.encode(self.max_filename, &mut buf[off..off + DIR_ENTRY_SIZE]);
        }
        let count_off = self.entries.len() * DIR_ENTRY_SIZE;
        buf[count_off..count_off + 2].copy_from_slice(&self.entry_count.to_le_bytes());
        buf
    }

    fn is_occupied(&self, slot: usize) -> bool {
        !self.entries[slot].filename.is_empty()
    }

    /// Linear scan, exact case-sensitive match. Authoritative regardless of
    /// `entry_count`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| self.is_occupied_entry(e) && e.filename == name)
    }

    fn is_occupied_entry(&self, e: &DirEntry) -> bool {
        !e.filename.is_empty()
    }

    pub fn find_free_slot(&self) -> Option<usize> {
        (0..self.entries.len()).find(|&i| !self.is_occupied(i))
    }

    /// Writes `entry` into the first free slot, bumps `entry_count`.
    pub fn insert(&mut self, entry: DirEntry) -> Result<usize> {
        let slot = self.find_free_slot().ok_or(Error::DirectoryFull)?;
        trace!("dir: inserting '{}' into slot {}", entry.filename, slot);
        self.entries[slot] = entry;
        self.entry_count += 1;
        Ok(slot)
    }

    /// Zeroes the entry at `slot`, decrements `entry_count`.
    pub fn remove(&mut self, slot: usize) {
        trace!("dir: clearing slot {}", slot);
        self.entries[slot] = DirEntry::empty();
        self.entry_count = self.entry_count.saturating_sub(1);
    }

    /// Populates slots 0/1 with `.`/`..` for a freshly created subdirectory.
    /// Only non-root directories get these; the root directory is left
    /// without them.
    pub fn init_subdir(&mut self, new_block: u32, parent_block: u32) {
        debug!(
            "dir: initializing subdir block {} (parent {})",
            new_block, parent_block
        );
        self.entries[0] = DirEntry {
            filename: ".".to_string(),
            file_size: 0,
            first_block: new_block as u16,
            entry_type: FILE_TYPE_DIR,
            created_time: 0,
            modified_time: 0,
            attributes: 0,
        };
        self.entries[1] = DirEntry {
            filename: "..".to_string(),
            file_size: 0,
            first_block: parent_block as u16,
            entry_type: FILE_TYPE_DIR,
            created_time: 0,
            modified_time: 0,
            attributes: 0,
        };
        self.entry_count = 2;
    }

    /// Authoritative count of non-empty slots, ignoring `entry_count`.
    pub fn occupied_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.filename.is_empty()).count()
    }

    pub fn iter_occupied(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().filter(|e| !e.filename.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> u32 {
        1_700_000_000
    }

    #[test]
    fn insert_then_find_round_trips() {
        let mut d = Directory::empty(12, 64);
        d.insert(DirEntry {
            filename: "a.txt".into(),
            file_size: 0,
            first_block: EOF,
            entry_type: FILE_TYPE_FILE,
            created_time: now(),
            modified_time: now(),
            attributes: 0,
        })
        .unwrap();
        assert_eq!(d.find("a.txt"), Some(0));
        assert_eq!(d.find("nope"), None);
        assert_eq!(d.occupied_count(), 1);
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut d = Directory::empty(12, 64);
        d.insert(DirEntry {
            filename: "hello".into(),
            file_size: 13,
            first_block: 7,
            entry_type: FILE_TYPE_FILE,
            created_time: now(),
            modified_time: now(),
            attributes: 0,
        })
        .unwrap();
        let buf = d.encode(1024);
        let decoded = Directory::decode(&buf, 12, 64);
        assert_eq!(decoded.find("hello"), Some(0));
        let e = &decoded.entries[0];
        assert_eq!(e.file_size, 13);
        assert_eq!(e.first_block, 7);
        assert_eq!(decoded.entry_count, 1);
    }

    #[test]
    fn full_directory_rejects_insert() {
        let mut d = Directory::empty(2, 64);
        d.insert(DirEntry { filename: "a".into(), ..DirEntry::empty() }).unwrap();
        d.insert(DirEntry { filename: "b".into(), ..DirEntry::empty() }).unwrap();
        assert!(matches!(
            d.insert(DirEntry { filename: "c".into(), ..DirEntry::empty() }),
            Err(Error::DirectoryFull)
        ));
    }

    #[test]
    fn remove_frees_slot_and_decrements_count() {
        let mut d = Directory::empty(4, 64);
        let slot = d.insert(DirEntry { filename: "x".into(), ..DirEntry::empty() }).unwrap();
        assert_eq!(d.entry_count, 1);
        d.remove(slot);
        assert_eq!(d.entry_count, 0);
        assert_eq!(d.find("x"), None);
        assert_eq!(d.find_free_slot(), Some(0));
    }

    #[test]
    fn init_subdir_sets_dot_and_dotdot() {
        let mut d = Directory::empty(12, 64);
        d.init_subdir(9, 3);
        assert_eq!(d.entries[0].filename, ".");
        assert_eq!(d.entries[0].first_block, 9);
        assert_eq!(d.entries[1].filename, "..");
        assert_eq!(d.entries[1].first_block, 3);
        assert_eq!(d.entry_count, 2);
    }
}
