use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::address::Address;
use crate::granule::{Alignment, GranuleSize};
use crate::table::{words_for, WORD_SIZE};
use crate::{ErrorKind, Result};

/// ヘッダの先頭に置かれるマジックナンバー.
pub const MAGIC_NUMBER: [u8; 4] = *b"gran";

/// テーブルを除いた固定長部分のサイズ.
pub(crate) const FIXED_FIELDS_SIZE: u64 =
    4 /* magic number */ +
    1 /* granule_log2 */ +
    1 /* alignment_log2 */ +
    2 /* reserved */ +
    4 /* granule_count */ +
    4 /* reserved */ +
    8 /* heap_start */;

/// テーブルの最初の一ワードも含めた固定長のヘッダサイズ.
pub const FIXED_HEADER_SIZE: u64 = FIXED_FIELDS_SIZE + WORD_SIZE as u64;

/// グラニュールヒープのヘッダ情報.
///
/// ヘッダ領域は、固定長部分とグラニュール割当テーブルから構成される.
/// 全ての値はリトルエンディアンで格納される.
///
/// ```text
/// offset  size  field
///      0     4  magic number ("gran")
///      4     1  granule_log2
///      5     1  alignment_log2
///      6     2  reserved
///      8     4  granule_count
///     12     4  reserved
///     16     8  heap_start
///     24   4*N  granule allocation table (N = ceil(granule_count / 32))
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranHeader {
    /// グラニュールのサイズ.
    pub granule_size: GranuleSize,

    /// ヒープの開始位置に要求されるアライメント.
    pub alignment: Alignment,

    /// 管理対象のグラニュールの数.
    pub granule_count: u32,

    /// 最初のグラニュールのアドレス.
    pub heap_start: Address,
}
impl GranHeader {
    /// ヘッダ領域全体(テーブルを含む)のサイズを返す.
    pub fn region_size(&self) -> u64 {
        Self::calc_region_size(self.granule_count)
    }

    /// グラニュールが占める領域のサイズ(バイト単位)を返す.
    pub fn heap_size(&self) -> u64 {
        u64::from(self.granule_count) << self.granule_size.log2()
    }

    /// 最後のグラニュールの終端アドレスを返す.
    pub fn heap_end(&self) -> Address {
        self.heap_start + self.heap_size()
    }

    /// ヘッダ情報を`reader`から読み込む.
    ///
    /// テーブル部分は読み込まない.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic_number = [0; 4];
        track_io!(reader.read_exact(&mut magic_number))?;
        track_assert_eq!(magic_number, MAGIC_NUMBER, ErrorKind::InvalidInput);

        let granule_log2 = track_io!(reader.read_u8())?;
        let granule_size = track!(GranuleSize::new(granule_log2))?;
        let alignment_log2 = track_io!(reader.read_u8())?;
        let alignment = track!(Alignment::new(alignment_log2))?;
        track_assert!(
            alignment.fits_in(granule_size),
            ErrorKind::InvalidInput,
            "granule_log2={}, alignment_log2={}",
            granule_log2,
            alignment_log2
        );
        let _reserved = track_io!(reader.read_u16::<LittleEndian>())?;

        let granule_count = track_io!(reader.read_u32::<LittleEndian>())?;
        let _reserved = track_io!(reader.read_u32::<LittleEndian>())?;
        let heap_start = Address::from(track_io!(reader.read_u64::<LittleEndian>())?);
        track_assert!(
            alignment.is_aligned(heap_start.as_u64()),
            ErrorKind::InvalidInput,
            "Unaligned heap start: {}",
            heap_start
        );
        Ok(GranHeader {
            granule_size,
            alignment,
            granule_count,
            heap_start,
        })
    }

    /// ヘッダ情報(固定長部分)を`writer`に書き込む.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        track_io!(writer.write_all(&MAGIC_NUMBER[..]))?;
        track_io!(writer.write_u8(self.granule_size.log2()))?;
        track_io!(writer.write_u8(self.alignment.log2()))?;
        track_io!(writer.write_u16::<LittleEndian>(0))?;
        track_io!(writer.write_u32::<LittleEndian>(self.granule_count))?;
        track_io!(writer.write_u32::<LittleEndian>(0))?;
        track_io!(writer.write_u64::<LittleEndian>(self.heap_start.as_u64()))?;
        Ok(())
    }

    /// `granule_count`個のグラニュールを管理するのに必要な、ヘッダ領域のサイズを計算する.
    ///
    /// 固定長部分に一ワード分のテーブルが含まれているため、グラニュール数が`0`の場合でも
    /// `FIXED_HEADER_SIZE`バイトが必要となる.
    pub(crate) fn calc_region_size(granule_count: u32) -> u64 {
        let words = words_for(granule_count).max(1) as u64;
        FIXED_HEADER_SIZE + WORD_SIZE as u64 * words - WORD_SIZE as u64
    }

    /// ヘッダ領域内のテーブルの位置(開始, 終端)を返す.
    pub(crate) fn table_range(&self) -> (usize, usize) {
        let start = FIXED_FIELDS_SIZE as usize;
        (start, start + words_for(self.granule_count) * WORD_SIZE)
    }
}

/// `[start, start + size)`の範囲から、ヒープの開始位置とグラニュール数を計算する.
///
/// 開始位置はアライメント境界に切り上げられ、終端はグラニュール境界に切り詰められる.
pub(crate) fn compute_layout(
    start: Address,
    size: u64,
    granule_size: GranuleSize,
    alignment: Alignment,
) -> Result<(Address, u32)> {
    let end = track_assert_some!(
        start.as_u64().checked_add(size),
        ErrorKind::InvalidInput,
        "Region end overflows: start={}, size={}",
        start,
        size
    );
    let heap_start = track_assert_some!(
        alignment.checked_ceil_align(start.as_u64()),
        ErrorKind::InvalidInput,
        "Cannot align the heap start: {}",
        start
    );
    if heap_start >= end {
        return Ok((Address::from(heap_start), 0));
    }

    let granule_count = granule_size.floor_align(end - heap_start) >> granule_size.log2();
    track_assert!(
        granule_count <= u64::from(u32::max_value()),
        ErrorKind::InvalidInput,
        "Too many granules: {}",
        granule_count
    );
    Ok((Address::from(heap_start), granule_count as u32))
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;

    #[test]
    fn it_works() -> TestResult {
        let header = GranHeader {
            granule_size: track!(GranuleSize::new(6))?,
            alignment: track!(Alignment::new(4))?,
            granule_count: 100,
            heap_start: Address::from(0x8000_0040),
        };
        assert_eq!(header.region_size(), FIXED_HEADER_SIZE + 4 * 3);
        assert_eq!(header.heap_size(), 6400);
        assert_eq!(header.heap_end(), Address::from(0x8000_0040 + 6400));
        assert_eq!(header.table_range(), (24, 24 + 16));

        let mut buf = Vec::new();
        track!(header.write_to(&mut buf))?;
        assert_eq!(buf.len() as u64, FIXED_FIELDS_SIZE);
        assert_eq!(&buf[..4], b"gran");

        let h = track!(GranHeader::read_from(&buf[..]))?;
        assert_eq!(h, header);
        Ok(())
    }

    #[test]
    fn region_size_works() {
        assert_eq!(FIXED_HEADER_SIZE, 28);
        assert_eq!(GranHeader::calc_region_size(0), 28);
        assert_eq!(GranHeader::calc_region_size(1), 28);
        assert_eq!(GranHeader::calc_region_size(32), 28);
        assert_eq!(GranHeader::calc_region_size(33), 32);
        assert_eq!(GranHeader::calc_region_size(256), 28 + 4 * 7);
    }

    #[test]
    fn broken_header_is_rejected() -> TestResult {
        let header = GranHeader {
            granule_size: track!(GranuleSize::new(12))?,
            alignment: track!(Alignment::new(12))?,
            granule_count: 10,
            heap_start: Address::from(0x1000),
        };
        let mut buf = Vec::new();
        track!(header.write_to(&mut buf))?;

        let mut b = buf.clone();
        b[0] = b'G';
        let e = GranHeader::read_from(&b[..]).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        // alignment_log2 > granule_log2
        let mut b = buf.clone();
        b[5] = 13;
        let e = GranHeader::read_from(&b[..]).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        // 途中で途切れている
        assert!(GranHeader::read_from(&buf[..20]).is_err());
        Ok(())
    }

    #[test]
    fn compute_layout_works() -> TestResult {
        let granule = track!(GranuleSize::new(4))?;
        let align = track!(Alignment::new(3))?;

        // 開始位置は8バイト境界に切り上げられ、終端は16バイト単位で切り詰められる
        let (start, count) = track!(compute_layout(Address::from(0x1003), 100, granule, align))?;
        assert_eq!(start, Address::from(0x1008));
        assert_eq!(count, 5);

        let (start, count) = track!(compute_layout(Address::from(0x1000), 15, granule, align))?;
        assert_eq!(start, Address::from(0x1000));
        assert_eq!(count, 0);

        let (_, count) = track!(compute_layout(Address::from(0x1001), 7, granule, align))?;
        assert_eq!(count, 0);

        assert!(compute_layout(Address::from(u64::max_value()), 1, granule, align).is_err());
        Ok(())
    }
}
