//! 权限掩码
//!
//! 掩码值与旧有磁盘格式逐位一致。其中一部分并非互不相交的单个位，
//! 例如 `GROUP_READ` (0x12) 同时覆盖了 `GROUP_WRITE` (0x10) 与 `OTHER_WRITE` (0x02)，
//! 因此这里不把它们当作位标志集合，而是当作需要整体匹配的掩码：
//! [`Permissions::contains`] 判断的是“掩码的每一位都已置上”。

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Permissions(u16);

impl Permissions {
    pub const OTHER_EXECUTE: Self = Self(0x0001);
    pub const OTHER_WRITE: Self = Self(0x0002);
    pub const OTHER_READ: Self = Self(0x0004);
    pub const GROUP_EXECUTE: Self = Self(0x0008);
    pub const GROUP_WRITE: Self = Self(0x0010);
    pub const GROUP_READ: Self = Self(0x0012);
    pub const USER_EXECUTE: Self = Self(0x0014);
    pub const USER_WRITE: Self = Self(0x0016);
    pub const USER_READ: Self = Self(0x0018);

    /// 权限字段中留给权限掩码的低 12 位，高 4 位记录目录项类型
    pub const MASK: u16 = 0x0FFF;

    const NAMED: [(&'static str, Self); 9] = [
        ("USER_READ", Self::USER_READ),
        ("USER_WRITE", Self::USER_WRITE),
        ("USER_EXECUTE", Self::USER_EXECUTE),
        ("GROUP_READ", Self::GROUP_READ),
        ("GROUP_WRITE", Self::GROUP_WRITE),
        ("GROUP_EXECUTE", Self::GROUP_EXECUTE),
        ("OTHER_READ", Self::OTHER_READ),
        ("OTHER_WRITE", Self::OTHER_WRITE),
        ("OTHER_EXECUTE", Self::OTHER_EXECUTE),
    ];

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// 超出 [`Self::MASK`] 的位被舍去
    #[inline]
    pub const fn from_bits_truncate(bits: u16) -> Self {
        Self(bits & Self::MASK)
    }

    #[inline]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = Self::NAMED
            .iter()
            .filter(|(_, mask)| self.contains(*mask))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "Permissions({:#06x}: {})", self.0, names.join(" | "))
    }
}
