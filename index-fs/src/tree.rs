//! # 文件树层
//!
//! 目录项之间用块编号互相引用：`block_location` 指向自己，
//! `parent_directory` 指向父目录，目录的索引指向子项。
//! 整棵树因此只是一组块编号，所有操作都以块编号为句柄。
//!
//! 目录项的生命周期：未分配 → 已分配(空) → 已分配(k 个内容块) → 已释放，
//! 只有 [`Volume::create_entry`]、[`Volume::write_content`]、[`Volume::truncate`]
//! 与 [`Volume::delete_entry`] 能推动状态变化。

use crate::layout::{DiskEntry, EntryKind};
use crate::volume::now;
use crate::{
    ENTRY_SIZE, EXTENSION_LEN, Error, INDEX_COUNT, Lba, NAME_LEN, Permissions, Result, Volume,
};

/// 解码后的目录项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub extension: String,
    pub location: Lba,
    pub kind: EntryKind,
    pub permissions: Permissions,
    pub created: u32,
    pub modified: u32,
    pub size: u64,
    pub parent: Lba,
    /// 目录为子项，文件为数据块
    pub blocks: Vec<Lba>,
}

impl DirectoryEntry {
    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

impl From<&DiskEntry> for DirectoryEntry {
    fn from(entry: &DiskEntry) -> Self {
        Self {
            name: entry.name(),
            extension: entry.extension(),
            location: entry.location(),
            kind: entry.kind(),
            permissions: entry.permissions(),
            created: entry.date_created(),
            modified: entry.date_modified(),
            size: entry.size(),
            parent: entry.parent(),
            blocks: entry.blocks(),
        }
    }
}

impl Volume {
    /// 在`parent`下创建目录项。
    ///
    /// 名字在兄弟项中唯一（区分大小写）；目录没有扩展名。
    pub fn create_entry(
        &mut self,
        parent: Lba,
        name: &str,
        extension: &str,
        kind: EntryKind,
        permissions: Permissions,
    ) -> Result<DirectoryEntry> {
        validate_name(name)?;
        validate_extension(extension, kind)?;

        let mut dir = self.load_dir(parent)?;
        if self.find_child(&dir, name)?.is_some() {
            return Err(Error::DuplicateName(name.to_owned()));
        }
        // 先确认有空槽位再分配，失败时磁盘上不留痕迹
        if dir.used_slots() == INDEX_COUNT {
            return Err(Error::DirectoryFull(parent));
        }

        let lba = self.alloc_blocks(1)?[0];
        let now = now();
        let entry = DiskEntry::new(lba, parent, name, extension, kind, permissions, now);
        let written = match self.cache.zeroize(lba) {
            Ok(()) => self.store(&entry),
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            self.roll_back(lba, &[lba]);
            return Err(err);
        }

        dir.push_block(lba);
        dir.set_size(dir.used_slots() as u64 * self.block_size());
        dir.touch(now);
        self.store(&dir)?;

        if kind == EntryKind::Directory {
            self.adjust_directories(true)?;
        }
        self.cache.sync_all()?;

        log::debug!("create parent={parent} name={name:?} kind={kind:?} lba={lba}");
        Ok((&entry).into())
    }

    /// 从`offset`起写入`data`，按需分配新块，返回写入的字节数。
    ///
    /// 超出 [`INDEX_COUNT`] 块或空间不足时，目录项保持原样；
    /// `offset`超过文件末尾时，中间的空洞以 0 填充。
    pub fn write_content(&mut self, lba: Lba, data: &[u8], offset: u64) -> Result<usize> {
        let mut entry = self.load_file(lba)?;
        if data.is_empty() {
            return Ok(0);
        }

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(Error::FileTooLarge(lba))?;
        let fresh = self.grow(&entry, end)?;

        let mut blocks = entry.blocks();
        blocks.extend_from_slice(&fresh);
        if let Err(err) = self.fill(&blocks, offset, data) {
            self.roll_back(lba, &fresh);
            return Err(err);
        }

        for &block in &fresh {
            entry.push_block(block);
        }
        entry.set_size(entry.size().max(end));
        entry.touch(now());
        self.store(&entry)?;
        self.cache.sync_all()?;

        Ok(data.len())
    }

    /// 读出`offset..offset + length`，范围不得超出文件大小
    pub fn read_content(&mut self, lba: Lba, offset: u64, length: u64) -> Result<Vec<u8>> {
        let entry = self.load_file(lba)?;
        let end = offset.checked_add(length);
        if end.is_none_or(|end| end > entry.size()) {
            return Err(Error::Range {
                offset,
                end: end.unwrap_or(u64::MAX),
                size: entry.size(),
            });
        }

        let blocks = entry.blocks();
        let block_size = self.block_size();
        let mut buf = vec![0; length as usize];
        let mut read_size = 0;
        let mut start = offset;

        while read_size < buf.len() {
            // 当前块的逻辑索引与块内偏移
            let index = (start / block_size) as usize;
            let inner = (start % block_size) as usize;
            let len = (block_size as usize - inner).min(buf.len() - read_size);

            let dest = &mut buf[read_size..read_size + len];
            self.cache.map_slice(blocks[index], |data| {
                dest.copy_from_slice(&data[inner..inner + len])
            })?;

            read_size += len;
            start += len as u64;
        }

        Ok(buf)
    }

    /// 把文件截断或扩展到`len`字节，扩展部分为 0
    pub fn truncate(&mut self, lba: Lba, len: u64) -> Result<()> {
        let mut entry = self.load_file(lba)?;
        let size = entry.size();
        if len == size {
            return Ok(());
        }

        if len > size {
            let fresh = self.grow(&entry, len)?;
            for &block in &fresh {
                entry.push_block(block);
            }
        } else {
            let block_size = self.block_size();
            let keep = len.div_ceil(block_size) as usize;
            let dropped = entry.truncate_blocks(keep);

            // 末块尾部清零，以后扩展时读到的是 0
            let tail = (len % block_size) as usize;
            if tail != 0 {
                let last = entry.blocks()[keep - 1];
                self.cache.map_mut_slice(last, |data| data[tail..].fill(0))?;
            }
            self.release_blocks(&dropped)?;
        }

        entry.set_size(len);
        entry.touch(now());
        self.store(&entry)?;
        self.cache.sync_all()
    }

    /// 删除目录项；目录会先递归删除全部子项（后序）
    pub fn delete_entry(&mut self, lba: Lba) -> Result<()> {
        if lba == self.root() {
            return Err(Error::RootDirectory);
        }

        let entry = self.load(lba)?;
        let parent = entry.parent();
        let mut dir = self.load_dir(parent)?;
        // 父目录不认领的块不是目录项，一块都不能释放
        if !dir.remove_block(lba) {
            return Err(Error::NoEntry(lba));
        }
        let moves_cwd = self.is_within(self.current_directory(), lba)?;

        self.release_content(&entry)?;

        dir.set_size(dir.used_slots() as u64 * self.block_size());
        dir.touch(now());
        self.store(&dir)?;

        self.release_blocks(&[lba])?;
        if entry.is_dir() {
            self.adjust_directories(false)?;
        }

        if moves_cwd {
            self.vcb.set_current_directory(parent);
            self.store_vcb()?;
        }
        self.cache.sync_all()?;

        log::debug!("delete lba={lba} name={:?} parent={parent}", entry.name());
        Ok(())
    }

    /// 从`start`开始逐段匹配子项名字
    pub fn resolve_path<S: AsRef<str>>(&mut self, start: Lba, path: &[S]) -> Result<Lba> {
        let mut current = start;

        for segment in path {
            let dir = self.load_dir(current)?;
            current = match segment.as_ref() {
                "." => current,
                ".." => dir.parent(),
                name => self
                    .find_child(&dir, name)?
                    .ok_or_else(|| Error::NotFound(name.to_owned()))?,
            };
        }

        // 空路径时起点本身也得是存活的目录项
        if path.is_empty() {
            self.load(current)?;
        }
        Ok(current)
    }

    /// 以`/`分隔的路径；以`/`开头时从根目录出发，否则从当前目录出发
    pub fn resolve(&mut self, path: &str) -> Result<Lba> {
        let start = if path.starts_with('/') {
            self.root()
        } else {
            self.current_directory()
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.resolve_path(start, &segments)
    }

    pub fn entry(&mut self, lba: Lba) -> Result<DirectoryEntry> {
        Ok((&self.load(lba)?).into())
    }

    /// 按槽位顺序列出子项
    pub fn read_dir(&mut self, lba: Lba) -> Result<Vec<DirectoryEntry>> {
        let dir = self.load_dir(lba)?;
        dir.blocks()
            .into_iter()
            .map(|child| self.entry(child))
            .collect()
    }

    pub fn set_permissions(&mut self, lba: Lba, permissions: Permissions) -> Result<()> {
        let mut entry = self.load(lba)?;
        entry.set_permissions(permissions);
        entry.touch(now());
        self.store(&entry)?;
        self.cache.sync_all()
    }
}

impl Volume {
    /// 读取存活的目录项：沿父目录链回到根目录，每一级都被父目录列出
    pub(crate) fn load(&mut self, lba: Lba) -> Result<DiskEntry> {
        let entry = self.read_entry(lba)?;
        let root = self.root();

        // 链长不会超过受管块数，超过即成环
        let mut child = entry;
        for _ in 0..=self.bitmap.governed() {
            if child.location() == root {
                return Ok(entry);
            }
            let parent = match self.read_entry(child.parent()) {
                Ok(parent) => parent,
                Err(Error::NoEntry(_)) => break,
                Err(err) => return Err(err),
            };
            if !parent.is_dir() || !parent.blocks().contains(&child.location()) {
                break;
            }
            child = parent;
        }

        Err(Error::NoEntry(lba))
    }

    /// 只看块本身：已分配且自引用一致，不核对父目录
    pub(crate) fn read_entry(&mut self, lba: Lba) -> Result<DiskEntry> {
        if !self.bitmap.contains(lba) || !self.is_allocated(lba)? {
            return Err(Error::NoEntry(lba));
        }

        let entry = self.cache.map(lba, 0, |entry: &DiskEntry| *entry)?;
        if entry.location() != lba {
            return Err(Error::NoEntry(lba));
        }
        Ok(entry)
    }

    pub(crate) fn load_dir(&mut self, lba: Lba) -> Result<DiskEntry> {
        let entry = self.load(lba)?;
        if !entry.is_dir() {
            return Err(Error::NotADirectory(lba));
        }
        Ok(entry)
    }

    fn load_file(&mut self, lba: Lba) -> Result<DiskEntry> {
        let entry = self.load(lba)?;
        if entry.is_dir() {
            return Err(Error::IsADirectory(lba));
        }
        Ok(entry)
    }

    pub(crate) fn store(&mut self, entry: &DiskEntry) -> Result<()> {
        let entry = *entry;
        self.cache
            .map_mut(entry.location(), 0, |on_disk: &mut DiskEntry| {
                *on_disk = entry
            })
    }

    fn find_child(&mut self, dir: &DiskEntry, name: &str) -> Result<Option<Lba>> {
        for child in dir.blocks() {
            if self.load(child)?.name_eq(name) {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// 为扩展到`end`字节分配所缺的块，新块已清零
    fn grow(&mut self, entry: &DiskEntry, end: u64) -> Result<Vec<Lba>> {
        let lba = entry.location();
        let needed = end.div_ceil(self.block_size());
        if needed > INDEX_COUNT as u64 {
            return Err(Error::FileTooLarge(lba));
        }

        let have = entry.used_slots();
        let fresh = self.alloc_blocks((needed as usize).saturating_sub(have))?;
        for &block in &fresh {
            if let Err(err) = self.cache.zeroize(block) {
                self.roll_back(lba, &fresh);
                return Err(err);
            }
        }
        Ok(fresh)
    }

    fn roll_back(&mut self, lba: Lba, fresh: &[Lba]) {
        if fresh.is_empty() {
            return;
        }
        log::warn!("rolling back {} blocks of entry {lba}", fresh.len());
        if let Err(err) = self.bitmap.dealloc(&mut self.cache, fresh) {
            log::warn!("roll back of entry {lba} failed: {err}");
        }
    }

    fn fill(&mut self, blocks: &[Lba], offset: u64, data: &[u8]) -> Result<()> {
        let block_size = self.block_size();
        let mut written = 0;
        let mut start = offset;

        while written < data.len() {
            let index = (start / block_size) as usize;
            let inner = (start % block_size) as usize;
            let len = (block_size as usize - inner).min(data.len() - written);

            let src = &data[written..written + len];
            self.cache
                .map_mut_slice(blocks[index], |dest| dest[inner..inner + len].copy_from_slice(src))?;

            written += len;
            start += len as u64;
        }

        Ok(())
    }

    /// 释放目录项的全部内容，目录则连同所有后代目录项；不释放目录项自身
    fn release_content(&mut self, entry: &DiskEntry) -> Result<()> {
        if !entry.is_dir() {
            return self.release_blocks(&entry.blocks());
        }

        for child in entry.blocks() {
            let child_entry = self.load(child)?;
            self.release_content(&child_entry)?;
            self.release_blocks(&[child])?;
            if child_entry.is_dir() {
                self.adjust_directories(false)?;
            }
        }
        Ok(())
    }

    /// `lba`是否为`ancestor`或其后代
    fn is_within(&mut self, mut lba: Lba, ancestor: Lba) -> Result<bool> {
        loop {
            if lba == ancestor {
                return Ok(true);
            }
            let parent = self.load(lba)?.parent();
            if parent == lba {
                return Ok(false);
            }
            lba = parent;
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.len() > NAME_LEN
        || name == "."
        || name == ".."
        || name.contains(['/', '\0']);
    if invalid {
        return Err(Error::InvalidName(name.to_owned()));
    }
    Ok(())
}

fn validate_extension(extension: &str, kind: EntryKind) -> Result<()> {
    let invalid = extension.len() > EXTENSION_LEN
        || extension.contains(['/', '\0'])
        || (kind == EntryKind::Directory && !extension.is_empty());
    if invalid {
        return Err(Error::InvalidName(extension.to_owned()));
    }
    Ok(())
}

// 目录项记录放得进一块
const _: () = assert!(ENTRY_SIZE >= core::mem::size_of::<DiskEntry>());
