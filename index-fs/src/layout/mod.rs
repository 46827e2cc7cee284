//! # 磁盘数据结构层
//!
//! 卷的布局，所有整数均为小端序，记录按声明顺序紧密排列：
//!
//! 卷控制块(#0) | 空闲空间位图(#1 ~ #49) | 目录项与数据块(#50 ~)

mod bitmap;
mod dir_entry;
mod vcb;

pub use self::{
    bitmap::{Bitmap, FreeSpaceHeader},
    dir_entry::{DiskEntry, EntryKind},
    vcb::VolumeControlBlock,
};

/// 名字以 `\0` 填充至定长
fn encode_name<const N: usize>(name: &str) -> [u8; N] {
    let bytes = name.as_bytes();
    let len = bytes.len().min(N);
    let mut buf = [0; N];
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

fn decode_name(bytes: &[u8]) -> String {
    let len = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}
