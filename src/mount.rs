//! Mount state: ties together an open block device, the decoded boot
//! sector, the FAT mirror, and "where we currently are" (current directory
//! block + current path string) into a single explicit handle.
//!
//! We take the explicit-handle option over a process-wide global, which is
//! the idiomatic-Rust answer and still lets a caller (the CLI binary) hold
//! exactly one instance at its top level.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use io_at::ReadAt;
use log::info;

use crate::block::{BlockDevice, FileBlockDevice, XorMask};
use crate::boot::BootSector;
use crate::config::{self, FormatOptions};
use crate::dir::DirEntry;
use crate::error::{Error, Result};
use crate::fat::{FatManager, EOF};
use crate::file::{self, Geometry};

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Creates/truncates the host file, writes the boot sector, an
/// all-FREE-except-system-area FAT, and an empty root directory block. The
/// root directory is left without `.`/`..`.
pub fn format(path: &Path, opts: &FormatOptions) -> Result<()> {
    opts.validate()?;

    let block_size = opts.block_size as usize;
    let total_blocks = (opts.disk_size / block_size as u64) as u32;
    let entries_per_dir_block = config::entries_per_dir_block(block_size, opts.max_files_per_dir);

    let entries_per_fat_block = block_size / 2;
    let fat_blocks = ((total_blocks as u64 + entries_per_fat_block as u64 - 1) / entries_per_fat_block as u64) as u32;
    let root_dir_block = 1 + fat_blocks;
    let data_start_block = root_dir_block + 1;

    if data_start_block >= total_blocks {
        return Err(Error::InvalidConfig(
            "disk too small for the requested block size / FAT layout".into(),
        ));
    }

    let mut dev = FileBlockDevice::create(path, block_size, total_blocks as u64)?;
    if let Some(password) = &opts.xor_password {
        dev.set_xor_mask(Some(XorMask::new(password, data_start_block as u64)));
    }

    let boot = BootSector {
        total_blocks,
        fat_blocks,
        root_dir_block,
        data_start_block,
        block_size: opts.block_size as u16,
        fat_copies: 1,
        volume_label: opts.volume_label.clone(),
        created_time: now(),
        max_files_per_dir: opts.max_files_per_dir,
        max_file_blocks: opts.max_file_blocks,
        encryption_enabled: opts.xor_password.is_some(),
    };
    dev.write_block(0, &boot.encode(block_size))?;

    let mut fat = FatManager::new_formatted(total_blocks, 1, fat_blocks, data_start_block, block_size);
    fat.flush_fat(&mut dev)?;

    let geo = Geometry {
        block_size,
        entries_per_dir_block,
        max_filename: config::MAX_FILENAME_SIZE,
        max_file_blocks: opts.max_file_blocks,
    };
    let root = crate::dir::Directory::empty(entries_per_dir_block, geo.max_filename);
    file::write_dir_block(&mut dev, root_dir_block, &root, geo)?;

    info!(
        "format: {} total_blocks={} block_size={} data_start_block={}",
        path.display(),
        total_blocks,
        block_size,
        data_start_block
    );
    Ok(())
}

/// A mounted image: open device handle, decoded boot sector, FAT mirror,
/// current directory block, current path. One instance mounts one image at
/// a time; mounting a second image first unmounts the current one.
pub struct FileSystem {
    dev: FileBlockDevice,
    boot: BootSector,
    fat: FatManager,
    geo: Geometry,
    cwd_block: u32,
    cwd_path: String,
}

impl FileSystem {
    /// Opens the host file, discovers its recorded block size, decodes and
    /// validates the boot sector, then loads the FAT mirror.
    pub fn mount(path: &Path) -> Result<Self> {
        Self::mount_with_password(path, None)
    }

    /// Like `mount`, but supplies the password for the optional XOR
    /// data-block mask when `boot.encryption_enabled` is set. A mismatched
    /// or absent password on an encrypted image mounts successfully
    /// (metadata stays plaintext) but yields garbage file contents on read
    /// — this hook is structural, not authenticating.
    pub fn mount_with_password(path: &Path, password: Option<&str>) -> Result<Self> {
        // The image's own block_size (a format-time choice anywhere in
        // config::MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE) isn't known yet, so we
        // can't size a block buffer to read block 0 through a BlockDevice
        // until we've peeked it. `peek_block_size` only needs a prefix no
        // longer than the smallest block size the format path ever writes.
        let mut peek_buf = vec![0u8; config::MIN_BLOCK_SIZE as usize];
        {
            let peek_file = std::fs::File::open(path)?;
            peek_file.read_at(&mut peek_buf, 0)?;
        }
        let block_size = BootSector::peek_block_size(&peek_buf)? as usize;

        let mut dev = FileBlockDevice::open(path, block_size)?;
        let file_len = dev.file_len()?;
        let mut buf = vec![0u8; block_size];
        dev.read_block(0, &mut buf)?;
        let boot = BootSector::decode(&buf, block_size, file_len)?;

        if boot.encryption_enabled {
            if let Some(password) = password {
                dev.set_xor_mask(Some(XorMask::new(password, boot.data_start_block as u64)));
            }
        }

        let fat = FatManager::load(&dev, 1, boot.fat_blocks, boot.data_start_block, boot.total_blocks)?;
        let entries_per_dir_block = config::entries_per_dir_block(block_size, boot.max_files_per_dir);
        let geo = Geometry {
            block_size,
            entries_per_dir_block,
            max_filename: config::MAX_FILENAME_SIZE,
            max_file_blocks: boot.max_file_blocks,
        };

        info!("mount: {} root_dir_block={}", path.display(), boot.root_dir_block);
        let cwd_block = boot.root_dir_block;
        Ok(FileSystem {
            dev,
            boot,
            fat,
            geo,
            cwd_block,
            cwd_path: "/".to_string(),
        })
    }

    /// The FAT is already persisted after every mutating operation, so
    /// there is nothing left to flush here; dropping `self` closes the
    /// device handle and releases the mirror.
    pub fn unmount(self) {
        info!("unmount");
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot
    }

    pub fn cwd_path(&self) -> &str {
        &self.cwd_path
    }

    pub fn free_blocks_count(&self) -> usize {
        self.fat.free_blocks_count()
    }

    pub fn ls(&self) -> Result<Vec<DirEntry>> {
        file::list_dir(&self.dev, self.cwd_block, self.geo)
    }

    pub fn create_file(&mut self, name: &str) -> Result<()> {
        file::create_file(&mut self.dev, self.cwd_block, name, now(), self.geo)
    }

    pub fn delete_file(&mut self, name: &str) -> Result<()> {
        file::delete_file(&mut self.dev, &mut self.fat, self.cwd_block, name, self.geo)
    }

    pub fn write_file(&mut self, name: &str, payload: &[u8]) -> Result<()> {
        file::write_file(&mut self.dev, &mut self.fat, self.cwd_block, name, payload, now(), self.geo)
    }

    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        file::read_file(&self.dev, &self.fat, self.cwd_block, name, self.geo)
    }

    pub fn truncate_file(&mut self, name: &str, new_size: u32) -> Result<()> {
        file::truncate_file(&mut self.dev, &mut self.fat, self.cwd_block, name, new_size, now(), self.geo)
    }

    pub fn mkdir(&mut self, name: &str) -> Result<()> {
        file::mkdir(&mut self.dev, &mut self.fat, self.cwd_block, name, now(), self.geo)?;
        Ok(())
    }

    /// Changes the current directory to the entry named `name` in the
    /// current directory. Only single-level navigation is supported (no
    /// multi-component paths); `..` and `.` work the same as any other
    /// directory-typed entry since they are ordinary entries in non-root
    /// directories.
    pub fn chdir(&mut self, name: &str) -> Result<()> {
        if name == "/" {
            self.cwd_block = self.boot.root_dir_block;
            self.cwd_path = "/".to_string();
            return Ok(());
        }
        let dir = file::read_dir_block(&self.dev, self.cwd_block, self.geo)?;
        let slot = dir.find(name).ok_or(Error::NotFound)?;
        let entry = &dir.entries[slot];
        if !entry.is_dir() {
            return Err(Error::NotADirectory);
        }
        self.cwd_block = entry.first_block as u32;
        self.cwd_path = if name == ".." {
            "/".to_string()
        } else if self.cwd_path == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", self.cwd_path, name)
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn fresh_image() -> (NamedTempFile, FileSystem) {
        let tmp = NamedTempFile::new().unwrap();
        let opts = FormatOptions {
            disk_size: config::MIN_DISK_SIZE,
            block_size: 1024,
            max_files_per_dir: 128,
            max_file_blocks: 65535,
            volume_label: "TEST".into(),
            xor_password: None,
        };
        format(tmp.path(), &opts).unwrap();
        let fs = FileSystem::mount(tmp.path()).unwrap();
        (tmp, fs)
    }

    #[test]
    fn format_then_mount_lists_empty_root() {
        let (_tmp, fs) = fresh_image();
        assert_eq!(fs.ls().unwrap().len(), 0);
        assert_eq!(fs.cwd_path(), "/");
    }

    #[test]
    fn mounts_an_image_formatted_with_a_non_default_block_size() {
        let tmp = NamedTempFile::new().unwrap();
        let opts = FormatOptions {
            disk_size: config::MIN_DISK_SIZE,
            block_size: 512,
            max_files_per_dir: 32,
            max_file_blocks: 65535,
            volume_label: "SMALLBLK".into(),
            xor_password: None,
        };
        format(tmp.path(), &opts).unwrap();

        let mut fs = FileSystem::mount(tmp.path()).unwrap();
        assert_eq!(fs.boot_sector().block_size, 512);
        fs.create_file("a").unwrap();
        fs.write_file("a", b"hi").unwrap();
        assert_eq!(fs.read_file("a").unwrap(), b"hi");
    }

    #[test]
    fn idempotent_format_and_remount() {
        let tmp = NamedTempFile::new().unwrap();
        let opts = FormatOptions::default();
        format(tmp.path(), &opts).unwrap();
        {
            let fs = FileSystem::mount(tmp.path()).unwrap();
            assert_eq!(fs.ls().unwrap().len(), 0);
            fs.unmount();
        }
        let fs = FileSystem::mount(tmp.path()).unwrap();
        assert_eq!(fs.ls().unwrap().len(), 0);
    }

    #[test]
    fn create_write_read_round_trip() {
        let (_tmp, mut fs) = fresh_image();
        fs.create_file("a.txt").unwrap();
        fs.write_file("a.txt", b"Hello, World!").unwrap();
        assert_eq!(fs.read_file("a.txt").unwrap(), b"Hello, World!");
        let entries = fs.ls().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, "a.txt");
        assert!(entries[0].is_file());
        assert_eq!(entries[0].file_size, 13);
    }

    #[test]
    fn truncate_shrinks_and_frees_blocks() {
        let (_tmp, mut fs) = fresh_image();
        fs.create_file("x").unwrap();
        let payload = vec![b'A'; 2049];
        fs.write_file("x", &payload).unwrap();
        fs.truncate_file("x", 500).unwrap();
        let data = fs.read_file("x").unwrap();
        assert_eq!(data.len(), 500);
        assert!(data.iter().all(|&b| b == b'A'));
    }

    #[test]
    fn mkdir_has_dot_and_dotdot() {
        let (_tmp, mut fs) = fresh_image();
        fs.mkdir("docs").unwrap();
        let entries = fs.ls().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_dir());
        fs.chdir("docs").unwrap();
        let sub = fs.ls().unwrap();
        assert_eq!(sub.len(), 2);
        assert_eq!(sub[0].filename, ".");
        assert_eq!(sub[1].filename, "..");
    }

    #[test]
    fn duplicate_create_fails() {
        let (_tmp, mut fs) = fresh_image();
        fs.create_file("dup").unwrap();
        assert!(matches!(fs.create_file("dup"), Err(Error::AlreadyExists)));
        assert_eq!(fs.ls().unwrap().len(), 1);
    }

    #[test]
    fn truncate_cannot_grow() {
        let (_tmp, mut fs) = fresh_image();
        fs.create_file("a.txt").unwrap();
        fs.write_file("a.txt", b"Hello, World!").unwrap();
        assert!(matches!(fs.truncate_file("a.txt", 999_999), Err(Error::CannotGrow)));
        assert_eq!(fs.read_file("a.txt").unwrap(), b"Hello, World!");
    }

    #[test]
    fn no_space_leaves_file_empty_and_restores_free_count() {
        let tmp = NamedTempFile::new().unwrap();
        let opts = FormatOptions {
            disk_size: config::MIN_DISK_SIZE,
            block_size: 1024,
            max_files_per_dir: 16,
            max_file_blocks: 65535,
            volume_label: "TINY".into(),
            xor_password: None,
        };
        format(tmp.path(), &opts).unwrap();
        let mut fs = FileSystem::mount(tmp.path()).unwrap();

        fs.create_file("hog").unwrap();
        let free_before_fill = fs.free_blocks_count();
        let filler = vec![b'B'; free_before_fill * 1024];
        fs.write_file("hog", &filler).unwrap();
        assert_eq!(fs.free_blocks_count(), 0);

        fs.create_file("y").unwrap();
        let free_before_attempt = fs.free_blocks_count();
        let err = fs.write_file("y", b"X").unwrap_err();
        assert!(matches!(err, Error::NoSpace));
        assert_eq!(fs.free_blocks_count(), free_before_attempt);

        let y = fs.ls().unwrap().into_iter().find(|e| e.filename == "y").unwrap();
        assert_eq!(y.first_block, EOF);
    }

    #[test]
    fn xor_mask_round_trips_with_correct_password_only() {
        let tmp = NamedTempFile::new().unwrap();
        let opts = FormatOptions {
            xor_password: Some("hunter2".into()),
            ..FormatOptions::default()
        };
        format(tmp.path(), &opts).unwrap();

        let mut fs = FileSystem::mount_with_password(tmp.path(), Some("hunter2")).unwrap();
        fs.create_file("secret").unwrap();
        fs.write_file("secret", b"top secret payload").unwrap();
        assert_eq!(fs.read_file("secret").unwrap(), b"top secret payload");

        let unmasked = FileSystem::mount_with_password(tmp.path(), None).unwrap();
        assert_ne!(unmasked.read_file("secret").unwrap(), b"top secret payload");
    }
}
