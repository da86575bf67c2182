//! A self-contained FAT-style file system stored entirely inside one host
//! file ("disk image").
//!
//! The core covers the on-disk layout together with block allocation, FAT
//! chain maintenance, and the directory engine: boot sector, a 16-bit File
//! Allocation Table, fixed-stride directory blocks, and the algorithms that
//! keep those three structures mutually consistent across file and
//! directory lifecycle operations. An image written by one implementation
//! is mountable by any other that follows the same byte layout.
//!
//! Transactions/journaling, multi-user concurrency, hierarchical
//! multi-component path resolution, hard/soft links, permissions, and
//! free-space compaction are explicitly out of scope; the command shell is
//! a thin external collaborator (see `src/bin/myfatfs.rs`), not part of
//! this library.

#[macro_use]
extern crate index_fixed;

pub mod block;
pub mod boot;
pub mod config;
pub mod dir;
pub mod error;
pub mod fat;
pub mod file;
pub mod mount;

pub use block::{BlockDevice, FileBlockDevice, XorMask};
pub use boot::BootSector;
pub use config::FormatOptions;
pub use dir::DirEntry;
pub use error::{Error, Result};
pub use mount::{format, FileSystem};
