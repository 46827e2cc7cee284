//! # 一致性检查
//!
//! 从根目录遍历整棵树，核对目录项之间的引用与位图。只报告，不修复。

use std::collections::BTreeMap;

use crate::layout::DiskEntry;
use crate::{Error, Lba, Result, Volume};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// 头部记录的空闲字节数与位图不符
    FreeSpaceMismatch { recorded: u64, counted: u64 },
    DirectoryCountMismatch { recorded: u64, counted: u64 },
    /// 被引用的块不是存活的目录项
    DanglingEntry { parent: Lba, child: Lba },
    BadParent { entry: Lba, recorded: Lba, expected: Lba },
    /// 引用了保留区或卷外的块
    OutOfRange { owner: Lba, block: Lba },
    /// 被引用的块在位图中是空闲的
    FreeBlockReferenced { owner: Lba, block: Lba },
    /// 同一块被两处引用
    SharedBlock { block: Lba, first: Lba, second: Lba },
    SizeMismatch { entry: Lba, size: u64, blocks: usize },
    /// 已分配却无人引用
    Leaked(Lba),
}

#[derive(Debug, Default)]
pub struct CheckReport {
    pub issues: Vec<Issue>,
    pub directories: u64,
    pub files: u64,
}

impl CheckReport {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl Volume {
    pub fn check(&mut self) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        // 块 -> 引用它的目录项
        let mut owners: BTreeMap<Lba, Lba> = BTreeMap::new();

        let root = self.root();
        owners.insert(root, root);
        let mut stack = vec![self.load(root)?];

        while let Some(entry) = stack.pop() {
            let lba = entry.location();
            let blocks = entry.blocks();
            self.check_size(&entry, &mut report);

            if entry.is_dir() {
                report.directories += 1;
            } else {
                report.files += 1;
            }

            for block in blocks {
                if !self.bitmap.contains(block) {
                    report.issues.push(Issue::OutOfRange { owner: lba, block });
                    continue;
                }
                if !self.is_allocated(block)? {
                    report
                        .issues
                        .push(Issue::FreeBlockReferenced { owner: lba, block });
                }
                if let Some(&first) = owners.get(&block) {
                    report.issues.push(Issue::SharedBlock {
                        block,
                        first,
                        second: lba,
                    });
                    continue;
                }
                owners.insert(block, lba);

                if entry.is_dir() {
                    match self.read_entry(block) {
                        Ok(child) => {
                            if child.parent() != lba {
                                report.issues.push(Issue::BadParent {
                                    entry: block,
                                    recorded: child.parent(),
                                    expected: lba,
                                });
                            }
                            stack.push(child);
                        }
                        Err(Error::NoEntry(_)) => report
                            .issues
                            .push(Issue::DanglingEntry { parent: lba, child: block }),
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        for block in self.bitmap.allocated(&mut self.cache)? {
            if !owners.contains_key(&block) {
                report.issues.push(Issue::Leaked(block));
            }
        }

        let counted = self.count_free()? * self.block_size();
        if counted != self.free_space() {
            report.issues.push(Issue::FreeSpaceMismatch {
                recorded: self.free_space(),
                counted,
            });
        }
        if report.directories != self.vcb.number_of_directories() {
            report.issues.push(Issue::DirectoryCountMismatch {
                recorded: self.vcb.number_of_directories(),
                counted: report.directories,
            });
        }

        for issue in &report.issues {
            log::warn!("check: {issue:?}");
        }
        Ok(report)
    }

    fn check_size(&self, entry: &DiskEntry, report: &mut CheckReport) {
        let blocks = entry.used_slots();
        let consistent = if entry.is_dir() {
            entry.size() == blocks as u64 * self.block_size()
        } else {
            entry.size().div_ceil(self.block_size()) == blocks as u64
        };

        if !consistent {
            report.issues.push(Issue::SizeMismatch {
                entry: entry.location(),
                size: entry.size(),
                blocks,
            });
        }
    }
}
