#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use index_fs::{
    BlockDevice, BlockError, EntryKind, FormatOptions, Lba, Permissions, RamDisk, Volume,
};

pub const VOLUME_ID: u32 = 0x1234_5678;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn options() -> FormatOptions {
    FormatOptions {
        volume_name: Some("scratch".to_owned()),
        volume_id: Some(VOLUME_ID),
        ..Default::default()
    }
}

/// 在内存盘上格式化出`blocks`块的卷
pub fn format(blocks: usize) -> (Arc<RamDisk>, Volume) {
    init_logger();
    let disk = Arc::new(RamDisk::new(512, blocks));
    let volume = Volume::format(disk.clone(), options()).unwrap();
    (disk, volume)
}

pub fn mkdir(volume: &mut Volume, parent: Lba, name: &str) -> Lba {
    volume
        .create_entry(parent, name, "", EntryKind::Directory, Permissions::USER_READ)
        .unwrap()
        .location
}

pub fn touch(volume: &mut Volume, parent: Lba, name: &str, extension: &str) -> Lba {
    volume
        .create_entry(
            parent,
            name,
            extension,
            EntryKind::File,
            Permissions::USER_READ | Permissions::USER_WRITE,
        )
        .unwrap()
        .location
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// 可以按需让读写失败的块设备
pub struct FaultyDisk {
    inner: RamDisk,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FaultyDisk {
    pub fn new(blocks: usize) -> Self {
        Self {
            inner: RamDisk::new(512, blocks),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl BlockDevice for FaultyDisk {
    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn num_blocks(&self) -> usize {
        self.inner.num_blocks()
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BlockError::Device("injected read failure"));
        }
        self.inner.read_block(block_id, buf)
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BlockError::Device("injected write failure"));
        }
        self.inner.write_block(block_id, buf)
    }
}
