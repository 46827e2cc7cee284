use block_dev::BlockError;

use crate::Lba;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot format volume: {0}")]
    Format(String),

    #[error("corrupt volume: {0}")]
    CorruptVolume(String),

    #[error("insufficient space: requested {requested} blocks, {available} free")]
    InsufficientSpace { requested: u64, available: u64 },

    #[error("block {0} is already free")]
    DoubleFree(Lba),

    #[error("block {0} is outside the accessible range")]
    Inaccessible(Lba),

    #[error("an entry named {0:?} already exists")]
    DuplicateName(String),

    #[error("directory {0} has no free slot")]
    DirectoryFull(Lba),

    #[error("entry {0} would exceed {max} blocks", max = crate::INDEX_COUNT)]
    FileTooLarge(Lba),

    #[error("no such file or directory: {0:?}")]
    NotFound(String),

    #[error("block {0} does not hold a live entry")]
    NoEntry(Lba),

    #[error("entry {0} is not a directory")]
    NotADirectory(Lba),

    #[error("entry {0} is a directory")]
    IsADirectory(Lba),

    #[error("range {offset}..{end} exceeds file size {size}")]
    Range { offset: u64, end: u64, size: u64 },

    #[error("invalid name {0:?}")]
    InvalidName(String),

    #[error("the root directory cannot be deleted")]
    RootDirectory,

    #[error("i/o error: {0}")]
    Io(#[from] BlockError),
}
