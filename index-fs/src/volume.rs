//! # 卷管理层
//!
//! 格式化与挂载卷，维护卷控制块，并在位图之上提供块分配。

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use block_dev::BlockDevice;

use crate::block_cache::BlockCache;
use crate::layout::{Bitmap, DiskEntry, EntryKind, VolumeControlBlock};
use crate::{
    BLOCK_SIZE, ENTRY_SIZE, Error, FIRST_ENTRY_LBA, Lba, NAME_LEN, Permissions, Result, VCB_LBA,
};

/// 格式化参数
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// 必须与设备的块大小一致
    pub block_size: usize,
    /// 缺省时占满整个设备
    pub total_blocks: Option<u64>,
    /// 缺省时由卷号生成
    pub volume_name: Option<String>,
    /// 缺省时随机生成
    pub volume_id: Option<u32>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            total_blocks: None,
            volume_name: None,
            volume_id: None,
        }
    }
}

/// 已挂载的卷，独占其块设备。
///
/// 所有操作都是同步的，一个操作结束前不会开始下一个；
/// 多线程访问需由调用者自行串行化。
pub struct Volume {
    pub(crate) cache: BlockCache,
    pub(crate) vcb: VolumeControlBlock,
    pub(crate) bitmap: Bitmap,
}

impl Volume {
    pub fn format(device: Arc<dyn BlockDevice>, options: FormatOptions) -> Result<Self> {
        let block_size = options.block_size;
        if block_size != device.block_size() {
            return Err(Error::Format(format!(
                "block size {block_size} differs from device block size {}",
                device.block_size()
            )));
        }
        if !block_size.is_power_of_two() || block_size < ENTRY_SIZE {
            return Err(Error::Format(format!(
                "block size {block_size} must be a power of two no less than {ENTRY_SIZE}"
            )));
        }

        let device_blocks = device.num_blocks() as u64;
        let total_blocks = options.total_blocks.unwrap_or(device_blocks);
        if total_blocks > device_blocks {
            return Err(Error::Format(format!(
                "{total_blocks} blocks requested but the device has {device_blocks}"
            )));
        }
        // 至少要放得下保留区与根目录
        if total_blocks <= FIRST_ENTRY_LBA.get() {
            return Err(Error::Format(format!(
                "{total_blocks} blocks cannot hold the reserved regions and a root directory"
            )));
        }
        let governed = total_blocks - FIRST_ENTRY_LBA.get();
        if governed > Bitmap::capacity(block_size) {
            return Err(Error::Format(format!(
                "{total_blocks} blocks exceed what the bitmap can track"
            )));
        }

        let volume_id = options.volume_id.unwrap_or_else(rand::random);
        let volume_name = options
            .volume_name
            .unwrap_or_else(|| format!("volume-{volume_id:08x}"));
        if volume_name.len() > NAME_LEN {
            return Err(Error::Format(format!(
                "volume name {volume_name:?} is longer than {NAME_LEN} bytes"
            )));
        }

        let mut cache = BlockCache::new(device, block_size);
        let vcb = VolumeControlBlock::new(block_size as u64, total_blocks, &volume_name, volume_id);
        cache.zeroize(VCB_LBA)?;
        let bitmap = Bitmap::format(&mut cache, block_size, Lba::new(total_blocks - 1))?;

        let mut volume = Self { cache, vcb, bitmap };

        // 根目录是第一个分配出去的块
        let root = volume.alloc_blocks(1)?[0];
        debug_assert_eq!(FIRST_ENTRY_LBA, root);
        let entry = DiskEntry::new(
            root,
            root,
            "/",
            "",
            EntryKind::Directory,
            Permissions::empty(),
            now(),
        );
        volume.cache.zeroize(root)?;
        volume.store(&entry)?;

        volume.vcb.set_number_of_directories(1);
        volume.store_vcb()?;
        volume.cache.sync_all()?;

        log::info!(
            "formatted volume name={volume_name:?} id={volume_id:#010x} blocks={total_blocks} block_size={block_size} free={}",
            volume.free_space()
        );
        Ok(volume)
    }

    pub fn mount(device: Arc<dyn BlockDevice>) -> Result<Self> {
        let device_block_size = device.block_size();
        let device_blocks = device.num_blocks() as u64;
        // 块太小时连卷控制块都映射不上
        if !device_block_size.is_power_of_two() || device_block_size < ENTRY_SIZE {
            return Err(Error::CorruptVolume(format!(
                "device block size {device_block_size} cannot hold a volume"
            )));
        }
        let mut cache = BlockCache::new(device, device_block_size);

        let vcb = cache.map(VCB_LBA, 0, |vcb: &VolumeControlBlock| *vcb)?;
        vcb.validate().map_err(Error::CorruptVolume)?;
        if vcb.block_size() != device_block_size as u64 {
            return Err(Error::CorruptVolume(format!(
                "block size {} differs from device block size {device_block_size}",
                vcb.block_size()
            )));
        }
        if vcb.number_of_blocks() > device_blocks {
            return Err(Error::CorruptVolume(format!(
                "volume spans {} blocks but the device has {device_blocks}",
                vcb.number_of_blocks()
            )));
        }

        let bitmap = Bitmap::load(&mut cache, device_block_size)?;
        if bitmap.lowest() != FIRST_ENTRY_LBA
            || bitmap.highest() != Lba::new(vcb.number_of_blocks() - 1)
        {
            return Err(Error::CorruptVolume(format!(
                "bitmap governs {}..={} on a {}-block volume",
                bitmap.lowest(),
                bitmap.highest(),
                vcb.number_of_blocks()
            )));
        }

        let mut volume = Self { cache, vcb, bitmap };
        if !volume.load(volume.root())?.is_dir() {
            return Err(Error::CorruptVolume(format!(
                "root {} is not a directory",
                volume.root()
            )));
        }

        log::info!(
            "mounted volume name={:?} id={:#010x} blocks={} free={}",
            volume.vcb.volume_name(),
            volume.vcb.volume_id(),
            volume.vcb.number_of_blocks(),
            volume.free_space()
        );
        Ok(volume)
    }

    /// 写回所有缓存
    pub fn sync(&mut self) -> Result<()> {
        self.cache.sync_all()
    }

    pub fn unmount(mut self) -> Result<()> {
        self.sync()
    }

    #[inline]
    pub fn vcb(&self) -> &VolumeControlBlock {
        &self.vcb
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        self.cache.device()
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        self.vcb.block_size()
    }

    #[inline]
    pub fn number_of_blocks(&self) -> u64 {
        self.vcb.number_of_blocks()
    }

    #[inline]
    pub fn root(&self) -> Lba {
        self.vcb.root_directory()
    }

    #[inline]
    pub fn current_directory(&self) -> Lba {
        self.vcb.current_directory()
    }

    /// 切换当前目录，目标必须是目录
    pub fn change_directory(&mut self, lba: Lba) -> Result<()> {
        self.load_dir(lba)?;
        self.vcb.set_current_directory(lba);
        self.store_vcb()?;
        self.cache.sync_all()?;
        log::debug!("cwd={lba}");
        Ok(())
    }

    /// 空闲字节数
    #[inline]
    pub fn free_space(&self) -> u64 {
        self.bitmap.free_space()
    }

    #[inline]
    pub fn free_blocks(&self) -> u64 {
        self.bitmap.free_blocks()
    }

    #[inline]
    pub fn lowest_block_accessible(&self) -> Lba {
        self.bitmap.lowest()
    }

    #[inline]
    pub fn highest_block_accessible(&self) -> Lba {
        self.bitmap.highest()
    }

    /// 首次适应分配`count`块，返回升序的块编号
    pub fn allocate(&mut self, count: usize) -> Result<Vec<Lba>> {
        let blocks = self.alloc_blocks(count)?;
        self.cache.sync_all()?;
        Ok(blocks)
    }

    pub fn free(&mut self, blocks: &[Lba]) -> Result<()> {
        self.release_blocks(blocks)?;
        self.cache.sync_all()
    }

    /// 保留区内的块总是已分配的
    pub fn is_allocated(&mut self, lba: Lba) -> Result<bool> {
        if lba < self.bitmap.lowest() {
            return Ok(true);
        }
        Ok(!self.bitmap.is_free(&mut self.cache, lba)?)
    }

    /// 按位图重新数出的空闲块数
    pub fn count_free(&mut self) -> Result<u64> {
        self.bitmap.count_free(&mut self.cache)
    }
}

impl Volume {
    pub(crate) fn alloc_blocks(&mut self, count: usize) -> Result<Vec<Lba>> {
        self.bitmap.alloc(&mut self.cache, count)
    }

    /// 释放前把块清零，已删除的目录项不会残留在磁盘上
    pub(crate) fn release_blocks(&mut self, blocks: &[Lba]) -> Result<()> {
        self.bitmap.dealloc(&mut self.cache, blocks)?;
        for &lba in blocks {
            self.cache.zeroize(lba)?;
        }
        Ok(())
    }

    pub(crate) fn store_vcb(&mut self) -> Result<()> {
        let vcb = self.vcb;
        self.cache
            .map_mut(VCB_LBA, 0, |on_disk: &mut VolumeControlBlock| *on_disk = vcb)
    }

    pub(crate) fn adjust_directories(&mut self, added: bool) -> Result<()> {
        let count = self.vcb.number_of_directories();
        self.vcb.set_number_of_directories(if added {
            count + 1
        } else {
            count.saturating_sub(1)
        });
        self.store_vcb()
    }
}

/// Unix 时间戳，超出 32 位后饱和
pub(crate) fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}
