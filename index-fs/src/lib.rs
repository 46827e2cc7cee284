//! # index-fs
//!
//! 建立在 LBA 寻址的虚拟磁盘上的文件系统，整体架构自上而下：
//!
//! 卷控制块 | 空闲空间位图 | 目录项与数据块
//!
//! 每个目录项独占一块，用至多 [`INDEX_COUNT`] 个直接块编号指向其内容：
//! 目录指向子目录项，文件指向数据块。没有间接索引。

// 一致性检查：遍历目录树核对位图
mod check;

// 文件树层：目录项的创建、读写、删除与路径解析
mod tree;

// 卷管理层：卷的格式化与挂载，以及空闲块分配
mod volume;

// 磁盘数据结构层
mod layout;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

mod error;
mod lba;
mod permission;

pub use block_dev::{BlockDevice, BlockError, RamDisk};

pub use self::{
    check::{CheckReport, Issue},
    error::{Error, Result},
    layout::{DiskEntry, EntryKind, FreeSpaceHeader, VolumeControlBlock},
    lba::Lba,
    permission::Permissions,
    tree::DirectoryEntry,
    volume::{FormatOptions, Volume},
};

/// 默认块大小
pub const BLOCK_SIZE: usize = 512;
/// 目录项记录的大小，块大小不得小于它
pub const ENTRY_SIZE: usize = 512;
/// 每个目录项的直接块编号个数
pub const INDEX_COUNT: usize = 54;
pub const NAME_LEN: usize = 30;
pub const EXTENSION_LEN: usize = 16;

pub const VCB_LBA: Lba = Lba::new(0);
/// 位图区域的起始块
pub const BITMAP_START: Lba = Lba::new(1);
pub const BITMAP_BLOCKS: u64 = 49;
/// 目录项区域的起始块，也是位图管辖的最低块
pub const FIRST_ENTRY_LBA: Lba = Lba::new(50);
/// 空槽位，块 0 永远是卷控制块，不会被当作内容块
pub const UNUSED: u64 = 0;
