use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::{BlockDevice, BlockError};

/// 内存中的磁盘镜像
#[derive(Debug)]
pub struct RamDisk {
    block_size: usize,
    blocks: usize,
    image: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(block_size: usize, blocks: usize) -> Self {
        Self {
            block_size,
            blocks,
            image: Mutex::new(vec![0; block_size * blocks]),
        }
    }

    /// 复制出整个镜像
    pub fn snapshot(&self) -> Vec<u8> {
        self.image.lock().clone()
    }

    fn range(&self, block_id: usize, len: usize) -> Result<core::ops::Range<usize>, BlockError> {
        if block_id >= self.blocks {
            return Err(BlockError::OutOfRange {
                block_id,
                blocks: self.blocks,
            });
        }
        if len != self.block_size {
            return Err(BlockError::BufferSize {
                len,
                block_size: self.block_size,
            });
        }

        let start = block_id * self.block_size;
        Ok(start..start + self.block_size)
    }
}

impl BlockDevice for RamDisk {
    #[inline]
    fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    fn num_blocks(&self) -> usize {
        self.blocks
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), BlockError> {
        let range = self.range(block_id, buf.len())?;
        buf.copy_from_slice(&self.image.lock()[range]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), BlockError> {
        let range = self.range(block_id, buf.len())?;
        self.image.lock()[range].copy_from_slice(buf);
        Ok(())
    }
}
