//! Random-access fixed-size block I/O over a host file.
//!
//! Reads and writes are positioned (pread/pwrite-style) via `io-at`'s
//! `ReadAt`/`WriteAt` traits, so callers never rely on a shared seek
//! cursor.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use io_at::{ReadAt, WriteAt};

use crate::error::{Error, Result};

pub trait BlockDevice {
    fn block_size(&self) -> usize;
    fn total_blocks(&self) -> u64;

    /// Fails if the device is out of range or `out` is not exactly
    /// `block_size` bytes. Short reads are failures, not partial success.
    fn read_block(&self, block: u64, out: &mut [u8]) -> Result<()>;

    /// Fails if the device is out of range or `data` is not exactly
    /// `block_size` bytes.
    fn write_block(&mut self, block: u64, data: &[u8]) -> Result<()>;
}

/// Structural (not cryptographically secure) XOR encryption hook for the
/// optional extension described in the design notes. Metadata blocks (boot
/// sector, FAT, directory blocks) stay plaintext so mount remains possible;
/// only blocks at or beyond `data_start_block` are masked.
#[derive(Clone)]
pub struct XorMask {
    keystream_seed: Vec<u8>,
    data_start_block: u64,
}

impl XorMask {
    pub fn new(password: &str, data_start_block: u64) -> Self {
        XorMask {
            keystream_seed: password.as_bytes().to_vec(),
            data_start_block,
        }
    }

    fn apply(&self, block: u64, buf: &mut [u8]) {
        if block < self.data_start_block || self.keystream_seed.is_empty() {
            return;
        }
        let block_bytes = block.to_le_bytes();
        for (i, byte) in buf.iter_mut().enumerate() {
            let seed_byte = self.keystream_seed[i % self.keystream_seed.len()];
            let block_byte = block_bytes[i % block_bytes.len()];
            *byte ^= seed_byte ^ block_byte;
        }
    }
}

/// A block device backed by a single host file.
pub struct FileBlockDevice {
    file: File,
    block_size: usize,
    total_blocks: u64,
    xor_mask: Option<XorMask>,
}

impl FileBlockDevice {
    /// Creates (or truncates) `path` to exactly `block_size * total_blocks`
    /// bytes of zeros.
    pub fn create(path: &Path, block_size: usize, total_blocks: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(block_size as u64 * total_blocks)?;
        Ok(FileBlockDevice {
            file,
            block_size,
            total_blocks,
            xor_mask: None,
        })
    }

    /// Opens an existing host file for read+write, sizing `total_blocks`
    /// from the file's length. Callers must still validate the boot sector
    /// before trusting this geometry.
    pub fn open(path: &Path, block_size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if block_size == 0 || len % block_size as u64 != 0 {
            return Err(Error::IncompatibleImage);
        }
        let total_blocks = len / block_size as u64;
        Ok(FileBlockDevice {
            file,
            block_size,
            total_blocks,
            xor_mask: None,
        })
    }

    /// Enables the optional XOR data-block mask. A structural hook, not a
    /// security mechanism.
    pub fn set_xor_mask(&mut self, mask: Option<XorMask>) {
        self.xor_mask = mask;
    }

    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl BlockDevice for FileBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn read_block(&self, block: u64, out: &mut [u8]) -> Result<()> {
        if block >= self.total_blocks {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "block index out of range",
            )));
        }
        if out.len() != self.block_size {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer is not block-sized",
            )));
        }
        let n = self.file.read_at(out, block * self.block_size as u64)?;
        if n != out.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short read of a block",
            )));
        }
        if let Some(mask) = &self.xor_mask {
            mask.apply(block, out);
        }
        Ok(())
    }

    fn write_block(&mut self, block: u64, data: &[u8]) -> Result<()> {
        if block >= self.total_blocks {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "block index out of range",
            )));
        }
        if data.len() != self.block_size {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer is not block-sized",
            )));
        }
        let masked;
        let data = if let Some(mask) = &self.xor_mask {
            let mut buf = data.to_vec();
            mask.apply(block, &mut buf);
            masked = buf;
            masked.as_slice()
        } else {
            data
        };
        let n = self.file.write_at(data, block * self.block_size as u64)?;
        if n != data.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short write of a block",
            )));
        }
        Ok(())
    }
}
