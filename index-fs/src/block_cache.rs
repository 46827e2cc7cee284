//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此我们在内存中开辟缓冲区，
//! 把即将操作的块复制到内存中，提高对块设备的操作效率。
//!
//! 缓存归卷所有，不同的卷互不干扰。脏块在 [`BlockCache::sync_all`] 时写回：
//! 按首次变脏的先后顺序写回，元数据块（卷控制块与位图）总在最后。

use std::sync::Arc;

use block_dev::BlockDevice;

use crate::{FIRST_ENTRY_LBA, Lba, Result};

/// 可以直接映射到块内字节上的磁盘结构。
///
/// # Safety
///
/// 实现者必须是 `repr(C, packed)` 的纯数据：对齐为 1，没有填充，任意字节模式都合法。
pub unsafe trait OnDisk: Copy {}

/// 内存中的块缓存
struct CachedBlock {
    lba: Lba,
    /// 缓存的数据
    data: Box<[u8]>,
    /// 变脏的次序，`None`表示与磁盘一致
    dirty: Option<u64>,
}

pub struct BlockCache {
    /// 底层块设备的引用
    device: Arc<dyn BlockDevice>,
    block_size: usize,
    /// 越靠后越是最近使用
    queue: Vec<CachedBlock>,
    next_seq: u64,
}

impl BlockCache {
    /// 块缓存个数的上限
    const CAPACITY: usize = 64;

    pub fn new(device: Arc<dyn BlockDevice>, block_size: usize) -> Self {
        Self {
            device,
            block_size,
            queue: Vec::with_capacity(Self::CAPACITY),
            next_seq: 0,
        }
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    pub fn map<T: OnDisk, V>(
        &mut self,
        lba: Lba,
        offset: usize,
        f: impl FnOnce(&T) -> V,
    ) -> Result<V> {
        let index = self.fetch(lba, true)?;
        Ok(f(view(&self.queue[index].data, offset)))
    }

    pub fn map_mut<T: OnDisk, V>(
        &mut self,
        lba: Lba,
        offset: usize,
        f: impl FnOnce(&mut T) -> V,
    ) -> Result<V> {
        let index = self.fetch(lba, true)?;
        self.mark_dirty(index);
        Ok(f(view_mut(&mut self.queue[index].data, offset)))
    }

    pub fn map_slice<V>(&mut self, lba: Lba, f: impl FnOnce(&[u8]) -> V) -> Result<V> {
        let index = self.fetch(lba, true)?;
        Ok(f(&self.queue[index].data))
    }

    pub fn map_mut_slice<V>(&mut self, lba: Lba, f: impl FnOnce(&mut [u8]) -> V) -> Result<V> {
        let index = self.fetch(lba, true)?;
        self.mark_dirty(index);
        Ok(f(&mut self.queue[index].data))
    }

    /// 清零整块，不必先从设备读出
    pub fn zeroize(&mut self, lba: Lba) -> Result<()> {
        let index = self.fetch(lba, false)?;
        self.queue[index].data.fill(0);
        self.mark_dirty(index);
        Ok(())
    }

    pub fn sync_all(&mut self) -> Result<()> {
        let mut dirty: Vec<_> = self
            .queue
            .iter()
            .enumerate()
            .filter_map(|(index, block)| {
                block
                    .dirty
                    .map(|seq| ((block.lba < FIRST_ENTRY_LBA, seq), index))
            })
            .collect();
        dirty.sort_unstable();

        for (_, index) in dirty {
            self.write_back(index)?;
        }
        Ok(())
    }
}

impl BlockCache {
    /// 块缓存调度策略：踢走最久未用的块
    fn fetch(&mut self, lba: Lba, load: bool) -> Result<usize> {
        // 尝试从缓冲区中读取块
        if let Some(index) = self.queue.iter().position(|block| block.lba == lba) {
            let block = self.queue.remove(index);
            self.queue.push(block);
            return Ok(self.queue.len() - 1);
        }

        // 触及上限，踢走最久未用的块；它若是脏块，则按写回顺序整体写回
        if self.queue.len() == Self::CAPACITY {
            if self.queue[0].dirty.is_some() {
                self.sync_all()?;
            }
            self.queue.remove(0);
        }

        let mut data = vec![0; self.block_size].into_boxed_slice();
        if load {
            self.device.read_block(lba.into(), &mut data)?;
        }
        self.queue.push(CachedBlock {
            lba,
            data,
            dirty: None,
        });

        Ok(self.queue.len() - 1)
    }

    fn mark_dirty(&mut self, index: usize) {
        let block = &mut self.queue[index];
        if block.dirty.is_none() {
            block.dirty = Some(self.next_seq);
            self.next_seq += 1;
        }
    }

    fn write_back(&mut self, index: usize) -> Result<()> {
        let block = &mut self.queue[index];
        if block.dirty.is_some() {
            self.device.write_block(block.lba.into(), &block.data)?;
            block.dirty = None;
        }
        Ok(())
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        if let Err(err) = self.sync_all() {
            log::warn!("block cache lost writes on drop: {err}");
        }
    }
}

fn view<T: OnDisk>(data: &[u8], offset: usize) -> &T {
    assert_eq!(1, align_of::<T>());
    assert!(offset + size_of::<T>() <= data.len());
    unsafe { &*data[offset..].as_ptr().cast::<T>() }
}

fn view_mut<T: OnDisk>(data: &mut [u8], offset: usize) -> &mut T {
    assert_eq!(1, align_of::<T>());
    assert!(offset + size_of::<T>() <= data.len());
    unsafe { &mut *data[offset..].as_mut_ptr().cast::<T>() }
}
