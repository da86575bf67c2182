//! Crate-wide error type.
//!
//! One structured enum rather than a grab bag of `io::Error`s so callers
//! (the CLI dispatch layer, tests) can match on the *kind* of failure.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    #[error("bad boot sector signature: {0:?}")]
    BadSignature(fmt_extra::AsciiStr<[u8; 8]>),

    #[error("image block size or length does not match this build's configuration")]
    IncompatibleImage,

    #[error("no such file or directory")]
    NotFound,

    #[error("that name already exists in this directory")]
    AlreadyExists,

    #[error("not a file")]
    NotAFile,

    #[error("not a directory")]
    NotADirectory,

    #[error("name exceeds the maximum filename length")]
    NameTooLong,

    #[error("directory has no free slot")]
    DirectoryFull,

    #[error("no free blocks remain in the FAT")]
    NoSpace,

    #[error("payload exceeds the maximum file size")]
    TooLarge,

    #[error("truncate cannot grow a file")]
    CannotGrow,

    #[error("FAT chain is corrupt")]
    CorruptChain,

    #[error("no image is mounted")]
    NotMounted,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
