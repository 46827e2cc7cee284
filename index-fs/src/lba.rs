use derive_more::{Add, Display, From, Into};

/// 逻辑块地址
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Add, Display, From, Into,
)]
#[repr(transparent)]
pub struct Lba(u64);

impl core::ops::Add<u64> for Lba {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        self + Self(rhs)
    }
}

impl From<Lba> for usize {
    fn from(lba: Lba) -> Self {
        lba.0 as usize
    }
}

impl Lba {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// 与`base`相距多少块
    #[inline]
    pub const fn offset_from(self, base: Lba) -> u64 {
        self.0 - base.0
    }
}
