use crate::block_cache::OnDisk;
use crate::{EXTENSION_LEN, INDEX_COUNT, Lba, NAME_LEN, Permissions, UNUSED};

/// 权限字段的高 4 位记录类型
const KIND_MASK: u16 = 0xF000;
/// 同 Unix 的 `S_IFDIR`
const KIND_DIRECTORY: u16 = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    #[default]
    File,
    Directory,
}

/// 目录项，一块一个，恰好 512 字节。
///
/// 目录的索引指向子目录项所在的块；
/// 文件的索引指向数据块。
/// 已用槽位总是排在最前面，其余槽位为 [`UNUSED`]。
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct DiskEntry {
    name: [u8; NAME_LEN],
    /// 文件类型，目录为空
    extension: [u8; EXTENSION_LEN],
    /// 目录项自身所在的块
    block_location: u64,
    permissions: u16,
    /// Unix 时间戳
    date_created: u32,
    date_modified: u32,
    /// 文件实际使用的字节数；目录为 子项数 * 块大小
    file_size: u64,
    /// 父目录项所在的块，根目录指向自己
    parent_directory: u64,
    index_locations: [u64; INDEX_COUNT],
}

unsafe impl OnDisk for DiskEntry {}

impl DiskEntry {
    pub fn new(
        location: Lba,
        parent: Lba,
        name: &str,
        extension: &str,
        kind: EntryKind,
        permissions: Permissions,
        now: u32,
    ) -> Self {
        let kind_bits = match kind {
            EntryKind::File => 0,
            EntryKind::Directory => KIND_DIRECTORY,
        };

        Self {
            name: super::encode_name(name),
            extension: super::encode_name(extension),
            block_location: location.get().to_le(),
            permissions: (kind_bits | permissions.bits()).to_le(),
            date_created: now.to_le(),
            date_modified: now.to_le(),
            file_size: 0,
            parent_directory: parent.get().to_le(),
            index_locations: [UNUSED; INDEX_COUNT],
        }
    }

    pub fn name(&self) -> String {
        super::decode_name(&self.name)
    }

    pub fn extension(&self) -> String {
        super::decode_name(&self.extension)
    }

    /// 不必解码整个名字的比较
    pub fn name_eq(&self, name: &str) -> bool {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_LEN);
        &self.name[..len] == name.as_bytes()
    }

    #[inline]
    pub fn location(&self) -> Lba {
        Lba::new(u64::from_le(self.block_location))
    }

    #[inline]
    pub fn parent(&self) -> Lba {
        Lba::new(u64::from_le(self.parent_directory))
    }

    pub fn kind(&self) -> EntryKind {
        if u16::from_le(self.permissions) & KIND_MASK == KIND_DIRECTORY {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    #[inline]
    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits_truncate(u16::from_le(self.permissions))
    }

    pub fn set_permissions(&mut self, permissions: Permissions) {
        let kind_bits = u16::from_le(self.permissions) & KIND_MASK;
        self.permissions = (kind_bits | permissions.bits()).to_le();
    }

    #[inline]
    pub fn date_created(&self) -> u32 {
        u32::from_le(self.date_created)
    }

    #[inline]
    pub fn date_modified(&self) -> u32 {
        u32::from_le(self.date_modified)
    }

    #[inline]
    pub fn touch(&mut self, now: u32) {
        self.date_modified = now.to_le();
    }

    #[inline]
    pub fn size(&self) -> u64 {
        u64::from_le(self.file_size)
    }

    #[inline]
    pub fn set_size(&mut self, size: u64) {
        self.file_size = size.to_le();
    }

    /// 已用槽位数
    pub fn used_slots(&self) -> usize {
        let index = self.index_locations;
        index.iter().take_while(|&&raw| raw != UNUSED).count()
    }

    /// 按槽位顺序给出全部块编号
    pub fn blocks(&self) -> Vec<Lba> {
        let index = self.index_locations;
        index
            .iter()
            .take_while(|&&raw| raw != UNUSED)
            .map(|&raw| Lba::new(u64::from_le(raw)))
            .collect()
    }

    /// 追加到第一个空槽位，槽位用尽则返回`false`
    pub fn push_block(&mut self, lba: Lba) -> bool {
        let slot = self.used_slots();
        if slot == INDEX_COUNT {
            return false;
        }

        let mut index = self.index_locations;
        index[slot] = lba.get().to_le();
        self.index_locations = index;
        true
    }

    /// 移除`lba`并把其后的槽位前移，保持已用槽位连续
    pub fn remove_block(&mut self, lba: Lba) -> bool {
        let mut index = self.index_locations;
        let Some(slot) = index.iter().position(|&raw| u64::from_le(raw) == lba.get()) else {
            return false;
        };

        index.copy_within(slot + 1.., slot);
        index[INDEX_COUNT - 1] = UNUSED;
        self.index_locations = index;
        true
    }

    /// 只保留前`keep`个槽位，返回被移除的块
    pub fn truncate_blocks(&mut self, keep: usize) -> Vec<Lba> {
        let dropped = self.blocks().split_off(keep.min(self.used_slots()));

        let mut index = self.index_locations;
        index[keep.min(INDEX_COUNT)..].fill(UNUSED);
        self.index_locations = index;
        dropped
    }
}
