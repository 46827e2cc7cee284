use core::mem;

use crate::block_cache::{BlockCache, OnDisk};
use crate::{BITMAP_BLOCKS, BITMAP_START, Error, FIRST_ENTRY_LBA, Lba, Result};

const HEADER_SIZE: usize = mem::size_of::<FreeSpaceHeader>();

/// 空闲空间信息，位于 #1 块开头，位图紧随其后，连续铺满 #1 ~ #49 块。
///
/// 位图的第 i 位对应第 `lowest + i` 块，1 为空闲，0 为已用。
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct FreeSpaceHeader {
    /// 空闲字节数，随分配与释放变化
    free_space: u64,
    lowest_block_accessible: u8,
    highest_block_accessible: u64,
}

unsafe impl OnDisk for FreeSpaceHeader {}

impl FreeSpaceHeader {
    #[inline]
    pub fn free_space(&self) -> u64 {
        u64::from_le(self.free_space)
    }

    #[inline]
    pub fn lowest(&self) -> Lba {
        Lba::new(self.lowest_block_accessible as u64)
    }

    #[inline]
    pub fn highest(&self) -> Lba {
        Lba::new(u64::from_le(self.highest_block_accessible))
    }
}

/// 位图区域，记录 `lowest..=highest` 的块分配情况。
///
/// 分配采用首次适应：从最低块开始向上扫描，返回的块编号严格升序。
#[derive(Debug)]
pub struct Bitmap {
    block_size: usize,
    header: FreeSpaceHeader,
}

/// 一位在位图区域内的位置
struct BitPos {
    block: Lba,
    offset: usize,
    mask: u8,
}

impl Bitmap {
    /// 位图最多能管辖的块数
    pub fn capacity(block_size: usize) -> u64 {
        ((BITMAP_BLOCKS as usize * block_size - HEADER_SIZE) * 8) as u64
    }

    /// 初始化位图区域：`FIRST_ENTRY_LBA..=highest`全部空闲
    pub fn format(cache: &mut BlockCache, block_size: usize, highest: Lba) -> Result<Self> {
        for i in 0..BITMAP_BLOCKS {
            cache.zeroize(BITMAP_START + i)?;
        }

        let mut bitmap = Self {
            block_size,
            header: FreeSpaceHeader {
                free_space: 0,
                lowest_block_accessible: FIRST_ENTRY_LBA.get() as u8,
                highest_block_accessible: highest.get().to_le(),
            },
        };

        // 整字节直接填满，零头逐位设置
        let governed = bitmap.governed();
        let full_bytes = (governed / 8) as usize;
        let mut byte = 0;
        while byte < full_bytes {
            let (block, offset) = bitmap.locate_byte(byte);
            let take = (block_size - offset).min(full_bytes - byte);
            cache.map_mut_slice(block, |data| data[offset..offset + take].fill(u8::MAX))?;
            byte += take;
        }
        for index in (full_bytes as u64 * 8)..governed {
            bitmap.set(cache, bitmap.lowest() + index, true)?;
        }

        bitmap.header.free_space = (governed * block_size as u64).to_le();
        bitmap.store_header(cache)?;
        Ok(bitmap)
    }

    pub fn load(cache: &mut BlockCache, block_size: usize) -> Result<Self> {
        let header = cache.map(BITMAP_START, 0, |header: &FreeSpaceHeader| *header)?;
        Ok(Self { block_size, header })
    }

    #[inline]
    pub fn header(&self) -> &FreeSpaceHeader {
        &self.header
    }

    #[inline]
    pub fn lowest(&self) -> Lba {
        self.header.lowest()
    }

    #[inline]
    pub fn highest(&self) -> Lba {
        self.header.highest()
    }

    /// 位图管辖的块数
    pub fn governed(&self) -> u64 {
        (self.highest().get() + 1).saturating_sub(self.lowest().get())
    }

    #[inline]
    pub fn free_space(&self) -> u64 {
        self.header.free_space()
    }

    #[inline]
    pub fn free_blocks(&self) -> u64 {
        self.free_space() / self.block_size as u64
    }

    #[inline]
    pub fn contains(&self, lba: Lba) -> bool {
        (self.lowest()..=self.highest()).contains(&lba)
    }

    pub fn is_free(&self, cache: &mut BlockCache, lba: Lba) -> Result<bool> {
        let pos = self.locate(lba)?;
        cache.map_slice(pos.block, |data| data[pos.offset] & pos.mask != 0)
    }

    /// 分配`count`块：要么全部成功，要么位图保持原样
    pub fn alloc(&mut self, cache: &mut BlockCache, count: usize) -> Result<Vec<Lba>> {
        let found = self.scan_free(cache, count)?;
        if found.len() < count {
            return Err(Error::InsufficientSpace {
                requested: count as u64,
                available: found.len() as u64,
            });
        }

        for &lba in &found {
            self.set(cache, lba, false)?;
        }
        self.adjust_free_space(cache, -(count as i64))?;
        log::trace!("alloc count={count} blocks={found:?}");

        Ok(found)
    }

    /// 释放一批块：任何一块不可释放时，一块都不释放
    pub fn dealloc(&mut self, cache: &mut BlockCache, blocks: &[Lba]) -> Result<()> {
        for (i, &lba) in blocks.iter().enumerate() {
            if !self.is_free(cache, lba)? && !blocks[..i].contains(&lba) {
                continue;
            }
            return Err(Error::DoubleFree(lba));
        }

        for &lba in blocks {
            self.set(cache, lba, true)?;
        }
        self.adjust_free_space(cache, blocks.len() as i64)?;
        log::trace!("dealloc blocks={blocks:?}");

        Ok(())
    }

    /// 重新数一遍空闲位
    pub fn count_free(&self, cache: &mut BlockCache) -> Result<u64> {
        let mut free = 0;
        self.for_each_byte(cache, |_, byte| {
            free += byte.count_ones() as u64;
            true
        })?;
        Ok(free)
    }

    /// 全部已分配块，供一致性检查使用
    pub fn allocated(&self, cache: &mut BlockCache) -> Result<Vec<Lba>> {
        let (lowest, governed) = (self.lowest(), self.governed());
        let mut used = Vec::new();
        self.for_each_byte(cache, |byte_index, byte| {
            for bit in 0..8 {
                let index = byte_index * 8 + bit;
                if index < governed && byte & (1 << bit) == 0 {
                    used.push(lowest + index);
                }
            }
            true
        })?;
        Ok(used)
    }
}

impl Bitmap {
    /// 首次适应：升序找出至多`count`个空闲块，不修改位图
    fn scan_free(&self, cache: &mut BlockCache, count: usize) -> Result<Vec<Lba>> {
        let lowest = self.lowest();
        let mut found = Vec::with_capacity(count);
        if count == 0 {
            return Ok(found);
        }

        self.for_each_byte(cache, |byte_index, byte| {
            let mut bits = byte;
            while bits != 0 && found.len() < count {
                let bit = bits.trailing_zeros() as u64;
                bits &= bits - 1;
                found.push(lowest + (byte_index * 8 + bit));
            }
            found.len() < count
        })?;

        Ok(found)
    }

    /// 依次访问位图的每个字节，`f`返回`false`时停止
    fn for_each_byte(
        &self,
        cache: &mut BlockCache,
        mut f: impl FnMut(u64, u8) -> bool,
    ) -> Result<()> {
        let bytes = self.governed().div_ceil(8) as usize;
        let mut byte = 0;

        while byte < bytes {
            let (block, offset) = self.locate_byte(byte);
            let take = (self.block_size - offset).min(bytes - byte);
            let proceed = cache.map_slice(block, |data| {
                data[offset..offset + take]
                    .iter()
                    .enumerate()
                    .all(|(i, &bits)| f((byte + i) as u64, bits))
            })?;
            if !proceed {
                break;
            }
            byte += take;
        }

        Ok(())
    }

    fn set(&self, cache: &mut BlockCache, lba: Lba, free: bool) -> Result<()> {
        let pos = self.locate(lba)?;
        cache.map_mut_slice(pos.block, |data| {
            if free {
                data[pos.offset] |= pos.mask;
            } else {
                data[pos.offset] &= !pos.mask;
            }
        })
    }

    fn adjust_free_space(&mut self, cache: &mut BlockCache, blocks: i64) -> Result<()> {
        let delta = blocks.unsigned_abs() * self.block_size as u64;
        let free_space = if blocks < 0 {
            self.free_space() - delta
        } else {
            self.free_space() + delta
        };
        self.header.free_space = free_space.to_le();
        self.store_header(cache)
    }

    fn store_header(&self, cache: &mut BlockCache) -> Result<()> {
        let header = self.header;
        cache.map_mut(BITMAP_START, 0, |on_disk: &mut FreeSpaceHeader| {
            *on_disk = header
        })
    }

    /// 位图区域内第`byte`个字节的位置（块号 + 块内偏移）
    fn locate_byte(&self, byte: usize) -> (Lba, usize) {
        let byte = HEADER_SIZE + byte;
        (
            BITMAP_START + (byte / self.block_size) as u64,
            byte % self.block_size,
        )
    }

    fn locate(&self, lba: Lba) -> Result<BitPos> {
        if !self.contains(lba) {
            return Err(Error::Inaccessible(lba));
        }

        let index = lba.offset_from(self.lowest());
        let (block, offset) = self.locate_byte((index / 8) as usize);
        Ok(BitPos {
            block,
            offset,
            mask: 1 << (index % 8),
        })
    }
}
