//! グラニュール(割当の最小単位)およびアライメント関連の構成要素.
use crate::{ErrorKind, Result};

/// 一回の割当・解放で扱えるグラニュール数の上限.
///
/// グラニュールテーブルの一ワード(32bit)分に相当する.
pub const MAX_GRANULES_PER_ALLOCATION: u32 = 32;

/// グラニュールのサイズを表現するための構造体.
///
/// サイズは常に2の冪であり、内部的にはその対数(`log2`)を保持している.
/// 取り得る値は`2^1`から`2^31`バイトまで.
///
/// # Examples
///
/// ```
/// use granalloc::granule::GranuleSize;
///
/// let size = GranuleSize::new(6).unwrap();
/// assert_eq!(size.as_u64(), 64);
/// assert_eq!(size.granules(47), 1);
/// assert_eq!(size.granules(65), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GranuleSize(u8);
impl GranuleSize {
    /// 許容される`log2`の最小値.
    pub const MIN_LOG2: u8 = 1;

    /// 許容される`log2`の最大値.
    pub const MAX_LOG2: u8 = 31;

    /// `2^log2`バイトのグラニュールサイズを生成する.
    ///
    /// # Errors
    ///
    /// `log2`が`GranuleSize::MIN_LOG2..=GranuleSize::MAX_LOG2`の範囲外の場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    ///
    /// # Examples
    ///
    /// ```
    /// use granalloc::ErrorKind;
    /// use granalloc::granule::GranuleSize;
    ///
    /// assert_eq!(GranuleSize::new(12).ok().map(|s| s.as_u64()), Some(4096));
    /// assert_eq!(GranuleSize::new(0).err().map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    /// assert_eq!(GranuleSize::new(32).err().map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    /// ```
    #[allow(clippy::new_ret_no_self)]
    pub fn new(log2: u8) -> Result<Self> {
        track_assert!(
            Self::MIN_LOG2 <= log2 && log2 <= Self::MAX_LOG2,
            ErrorKind::InvalidInput,
            "Granule size out of range: 2^{}",
            log2
        );
        Ok(GranuleSize(log2))
    }

    /// サイズの対数を返す.
    pub fn log2(self) -> u8 {
        self.0
    }

    /// サイズをバイト単位で返す.
    pub fn as_u64(self) -> u64 {
        1 << self.0
    }

    /// `size`バイトを格納するために必要なグラニュール数を返す(切り上げ).
    pub fn granules(self, size: u64) -> u64 {
        self.ceil_align(size) >> self.0
    }

    /// 一回の割当で扱える最大のバイト数を返す.
    pub fn max_allocation_size(self) -> u64 {
        u64::from(MAX_GRANULES_PER_ALLOCATION) << self.0
    }

    /// 指定位置より後方の最初のグラニュール境界を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use granalloc::granule::GranuleSize;
    ///
    /// let size = GranuleSize::new(4).unwrap();
    /// assert_eq!(size.ceil_align(0), 0);
    /// assert_eq!(size.ceil_align(1), 16);
    /// assert_eq!(size.ceil_align(16), 16);
    /// ```
    pub fn ceil_align(self, position: u64) -> u64 {
        let mask = self.as_u64() - 1;
        (position + mask) & !mask
    }

    /// 指定位置より前方の最初のグラニュール境界を返す.
    ///
    /// # Examples
    ///
    /// ```
    /// use granalloc::granule::GranuleSize;
    ///
    /// let size = GranuleSize::new(4).unwrap();
    /// assert_eq!(size.floor_align(0), 0);
    /// assert_eq!(size.floor_align(15), 0);
    /// assert_eq!(size.floor_align(33), 32);
    /// ```
    pub fn floor_align(self, position: u64) -> u64 {
        position & !(self.as_u64() - 1)
    }

    /// 指定位置がグラニュール境界に沿っているかどうかを判定する.
    pub fn is_aligned(self, position: u64) -> bool {
        position & (self.as_u64() - 1) == 0
    }
}

/// ヒープの開始位置に要求されるアライメント.
///
/// `2^0`(アライメント不要)から`2^31`バイトまでを表現可能.
///
/// 同じヒープのグラニュールサイズ以下である必要があり、
/// これにより全てのグラニュールの先頭が要求アライメントを満たすことが保証される.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Alignment(u8);
impl Alignment {
    /// 許容される`log2`の最大値.
    pub const MAX_LOG2: u8 = 31;

    /// `2^log2`バイトのアライメントを生成する.
    ///
    /// # Errors
    ///
    /// `log2`が`Alignment::MAX_LOG2`を超える場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(log2: u8) -> Result<Self> {
        track_assert!(
            log2 <= Self::MAX_LOG2,
            ErrorKind::InvalidInput,
            "Alignment out of range: 2^{}",
            log2
        );
        Ok(Alignment(log2))
    }

    /// アライメントの対数を返す.
    pub fn log2(self) -> u8 {
        self.0
    }

    /// アライメントをバイト単位で返す.
    pub fn as_u64(self) -> u64 {
        1 << self.0
    }

    /// 指定位置より後方の最初のアライメント境界を返す.
    ///
    /// オーバーフローする場合には`None`が返される.
    ///
    /// # Examples
    ///
    /// ```
    /// use granalloc::granule::Alignment;
    ///
    /// let align = Alignment::new(4).unwrap();
    /// assert_eq!(align.checked_ceil_align(0x1001), Some(0x1010));
    /// assert_eq!(align.checked_ceil_align(0x1010), Some(0x1010));
    /// assert_eq!(align.checked_ceil_align(u64::max_value()), None);
    /// ```
    pub fn checked_ceil_align(self, position: u64) -> Option<u64> {
        let mask = self.as_u64() - 1;
        position.checked_add(mask).map(|p| p & !mask)
    }

    /// 指定位置がアライメント境界に沿っているかどうかを判定する.
    pub fn is_aligned(self, position: u64) -> bool {
        position & (self.as_u64() - 1) == 0
    }

    /// このアライメントが`granule`の境界と両立するかを確認する.
    ///
    /// "両立する"とは、グラニュールサイズがアライメントの倍数であることを意味する.
    pub fn fits_in(self, granule: GranuleSize) -> bool {
        self.0 <= granule.log2()
    }
}
impl Default for Alignment {
    fn default() -> Self {
        Alignment(0)
    }
}
