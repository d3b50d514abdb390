use std::fmt;
use std::ops::{Add, Sub};

/// ヒープ領域内の位置を表す整数アドレス.
///
/// 生ポインタではなく単なる整数値であり、実際のメモリへのアクセスは
/// 常に[`HeapRegion`]の範囲検査を経由して行われる.
///
/// [`HeapRegion`]: ../region/struct.HeapRegion.html
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Default)]
pub struct Address(u64);
impl Address {
    /// アドレスの値を返す.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// `offset`バイトだけ後方のアドレスを返す.
    ///
    /// オーバーフローする場合には`None`が返される.
    pub fn checked_add(self, offset: u64) -> Option<Self> {
        self.0.checked_add(offset).map(Address)
    }

    /// `base`からの距離(バイト数)を返す.
    ///
    /// `self`が`base`よりも前方にある場合には`None`が返される.
    pub fn checked_offset_from(self, base: Address) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}
impl From<u64> for Address {
    fn from(from: u64) -> Self {
        Address(from)
    }
}
impl From<Address> for u64 {
    fn from(from: Address) -> Self {
        from.0
    }
}
impl Add<u64> for Address {
    type Output = Self;
    fn add(self, rhs: u64) -> Self {
        self.checked_add(rhs).expect("address overflow")
    }
}
impl Sub for Address {
    type Output = u64;
    fn sub(self, rhs: Self) -> u64 {
        self.checked_offset_from(rhs).expect("address underflow")
    }
}
impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
