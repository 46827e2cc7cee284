use crate::block_cache::OnDisk;
use crate::{ENTRY_SIZE, FIRST_ENTRY_LBA, Lba, NAME_LEN};

/// 卷控制块，位于 #0 块：
/// - 描述卷的几何信息；
/// - 记录根目录与当前目录的位置
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct VolumeControlBlock {
    /// 卷的总字节数
    volume_size: u64,
    root_directory: u64,
    current_directory: u64,
    number_of_directories: u64,
    volume_name: [u8; NAME_LEN],
    /// 格式化时随机生成，允许碰撞
    volume_id: u32,
    block_size: u64,
    number_of_blocks: u64,
}

unsafe impl OnDisk for VolumeControlBlock {}

impl VolumeControlBlock {
    pub fn new(block_size: u64, number_of_blocks: u64, name: &str, volume_id: u32) -> Self {
        Self {
            volume_size: (block_size * number_of_blocks).to_le(),
            root_directory: FIRST_ENTRY_LBA.get().to_le(),
            current_directory: FIRST_ENTRY_LBA.get().to_le(),
            number_of_directories: 0,
            volume_name: super::encode_name(name),
            volume_id: volume_id.to_le(),
            block_size: block_size.to_le(),
            number_of_blocks: number_of_blocks.to_le(),
        }
    }

    #[inline]
    pub fn volume_size(&self) -> u64 {
        u64::from_le(self.volume_size)
    }

    #[inline]
    pub fn root_directory(&self) -> Lba {
        Lba::new(u64::from_le(self.root_directory))
    }

    #[inline]
    pub fn current_directory(&self) -> Lba {
        Lba::new(u64::from_le(self.current_directory))
    }

    #[inline]
    pub fn set_current_directory(&mut self, lba: Lba) {
        self.current_directory = lba.get().to_le();
    }

    #[inline]
    pub fn number_of_directories(&self) -> u64 {
        u64::from_le(self.number_of_directories)
    }

    #[inline]
    pub fn set_number_of_directories(&mut self, count: u64) {
        self.number_of_directories = count.to_le();
    }

    pub fn volume_name(&self) -> String {
        super::decode_name(&self.volume_name)
    }

    #[inline]
    pub fn volume_id(&self) -> u32 {
        u32::from_le(self.volume_id)
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        u64::from_le(self.block_size)
    }

    #[inline]
    pub fn number_of_blocks(&self) -> u64 {
        u64::from_le(self.number_of_blocks)
    }

    /// 校验几何信息，返回不合法的原因
    pub fn validate(&self) -> Result<(), String> {
        let (block_size, blocks) = (self.block_size(), self.number_of_blocks());

        if !block_size.is_power_of_two() || block_size < ENTRY_SIZE as u64 {
            return Err(format!(
                "block size {block_size} is not a power of two no less than {ENTRY_SIZE}"
            ));
        }
        if block_size.checked_mul(blocks) != Some(self.volume_size()) {
            return Err(format!(
                "volume size {} != {block_size} * {blocks}",
                self.volume_size()
            ));
        }

        let in_range = |lba: Lba| (FIRST_ENTRY_LBA.get()..blocks).contains(&lba.get());
        if !in_range(self.root_directory()) {
            return Err(format!("root directory {} out of range", self.root_directory()));
        }
        if !in_range(self.current_directory()) {
            return Err(format!(
                "current directory {} out of range",
                self.current_directory()
            ));
        }

        Ok(())
    }
}
