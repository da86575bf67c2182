//! Boot sector (superblock) codec. Occupies block 0 of the image.
//!
//! Field offsets are fixed and documented here so that an image written by
//! one implementation stays mountable by any other: signature(8),
//! total_blocks(4), fat_blocks(4), root_dir_block(4), data_start_block(4),
//! block_size(2), fat_copies(1), volume_label(16), created_time(4),
//! followed by two fields recorded explicitly (rather than re-derived on
//! every mount) so a fresh mount can recompute directory capacity directly:
//! max_files_per_dir(2), max_file_blocks(4), encryption_enabled(1).

use fmt_extra::AsciiStr;

use crate::config;
use crate::error::{Error, Result};

const OFF_TOTAL_BLOCKS: usize = 8;
const OFF_FAT_BLOCKS: usize = 12;
const OFF_ROOT_DIR_BLOCK: usize = 16;
const OFF_DATA_START_BLOCK: usize = 20;
const OFF_BLOCK_SIZE: usize = 24;
const OFF_FAT_COPIES: usize = 26;
const OFF_VOLUME_LABEL: usize = 27;
const OFF_CREATED_TIME: usize = 43;
const OFF_MAX_FILES_PER_DIR: usize = 47;
const OFF_MAX_FILE_BLOCKS: usize = 49;
const OFF_ENCRYPTION_ENABLED: usize = 53;
const MIN_ENCODED_LEN: usize = 54;

#[derive(Debug, Clone)]
pub struct BootSector {
    pub total_blocks: u32,
    pub fat_blocks: u32,
    pub root_dir_block: u32,
    pub data_start_block: u32,
    pub block_size: u16,
    pub fat_copies: u8,
    pub volume_label: String,
    pub created_time: u32,
    pub max_files_per_dir: u16,
    pub max_file_blocks: u32,
    pub encryption_enabled: bool,
}

impl BootSector {
    /// Zero-padded to `block_size` bytes.
    pub fn encode(&self, block_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; block_size];
        buf[0..8].copy_from_slice(config::SIGNATURE);
        buf[OFF_TOTAL_BLOCKS..OFF_TOTAL_BLOCKS + 4].copy_from_slice(&self.total_blocks.to_le_bytes());
        buf[OFF_FAT_BLOCKS..OFF_FAT_BLOCKS + 4].copy_from_slice(&self.fat_blocks.to_le_bytes());
        buf[OFF_ROOT_DIR_BLOCK..OFF_ROOT_DIR_BLOCK + 4]
            .copy_from_slice(&self.root_dir_block.to_le_bytes());
        buf[OFF_DATA_START_BLOCK..OFF_DATA_START_BLOCK + 4]
            .copy_from_slice(&self.data_start_block.to_le_bytes());
        buf[OFF_BLOCK_SIZE..OFF_BLOCK_SIZE + 2].copy_from_slice(&self.block_size.to_le_bytes());
        buf[OFF_FAT_COPIES] = self.fat_copies;

        let label = self.volume_label.as_bytes();
        let n = label.len().min(config::VOLUME_LABEL_SIZE - 1);
        buf[OFF_VOLUME_LABEL..OFF_VOLUME_LABEL + n].copy_from_slice(&label[..n]);
        // remainder of the label field is already NUL from the zero fill

        buf[OFF_CREATED_TIME..OFF_CREATED_TIME + 4].copy_from_slice(&self.created_time.to_le_bytes());
        buf[OFF_MAX_FILES_PER_DIR..OFF_MAX_FILES_PER_DIR + 2]
            .copy_from_slice(&self.max_files_per_dir.to_le_bytes());
        buf[OFF_MAX_FILE_BLOCKS..OFF_MAX_FILE_BLOCKS + 4]
            .copy_from_slice(&self.max_file_blocks.to_le_bytes());
        buf[OFF_ENCRYPTION_ENABLED] = self.encryption_enabled as u8;
        buf
    }

    /// Reads just the signature and `block_size` field out of a prefix of
    /// block 0, before the caller knows the image's actual block size (and
    /// so before it can size a full block buffer to pass to `decode`).
    /// `mount` uses this to discover the block size an image was formatted
    /// with, rather than assuming this build's default.
    pub fn peek_block_size(buf: &[u8]) -> Result<u16> {
        if buf.len() < MIN_ENCODED_LEN {
            return Err(Error::IncompatibleImage);
        }
        let sig = *index_fixed!(buf; 0, .. 8);
        if &sig != config::SIGNATURE {
            return Err(Error::BadSignature(AsciiStr(sig)));
        }
        Ok(le_u16(buf, OFF_BLOCK_SIZE))
    }

    /// Validates the signature and that `block_size`/`total_blocks` agree
    /// with the caller's configured block size and the host file's length.
    pub fn decode(buf: &[u8], expected_block_size: usize, file_len: u64) -> Result<Self> {
        if buf.len() < MIN_ENCODED_LEN {
            return Err(Error::IncompatibleImage);
        }

        let sig = *index_fixed!(buf; 0, .. 8);
        if &sig != config::SIGNATURE {
            return Err(Error::BadSignature(AsciiStr(sig)));
        }

        let total_blocks = le_u32(buf, OFF_TOTAL_BLOCKS);
        let fat_blocks = le_u32(buf, OFF_FAT_BLOCKS);
        let root_dir_block = le_u32(buf, OFF_ROOT_DIR_BLOCK);
        let data_start_block = le_u32(buf, OFF_DATA_START_BLOCK);
        let block_size = le_u16(buf, OFF_BLOCK_SIZE);
        let fat_copies = buf[OFF_FAT_COPIES];

        let label_bytes = &buf[OFF_VOLUME_LABEL..OFF_VOLUME_LABEL + config::VOLUME_LABEL_SIZE];
        let nul = label_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(label_bytes.len());
        let volume_label = String::from_utf8_lossy(&label_bytes[..nul]).into_owned();

        let created_time = le_u32(buf, OFF_CREATED_TIME);
        let max_files_per_dir = le_u16(buf, OFF_MAX_FILES_PER_DIR);
        let max_file_blocks = le_u32(buf, OFF_MAX_FILE_BLOCKS);
        let encryption_enabled = buf[OFF_ENCRYPTION_ENABLED] != 0;

        if block_size as usize != expected_block_size {
            return Err(Error::IncompatibleImage);
        }
        if (total_blocks as u64).saturating_mul(block_size as u64) != file_len {
            return Err(Error::IncompatibleImage);
        }

        Ok(BootSector {
            total_blocks,
            fat_blocks,
            root_dir_block,
            data_start_block,
            block_size,
            fat_copies,
            volume_label,
            created_time,
            max_files_per_dir,
            max_file_blocks,
            encryption_enabled,
        })
    }
}

fn le_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().expect("4-byte slice"))
}

fn le_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().expect("2-byte slice"))
}
