//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//!
//! 文件系统只通过块设备驱动读写块设备，驱动出错时不做重试。

#![no_std]

extern crate alloc;

mod error;
mod ram_disk;

use core::any::Any;

pub use self::{error::BlockError, ram_disk::RamDisk};

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    /// 每块的字节数
    fn block_size(&self) -> usize;

    /// 设备的总块数
    fn num_blocks(&self) -> usize;

    /// `buf`的长度必须恰为一块
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockError>;

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockError>;
}
