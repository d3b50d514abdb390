//! アロケータに管理させるメモリ領域.
use crate::address::Address;
use crate::{ErrorKind, Result};

/// グラニュールアロケータが管理する、予め確保済みの連続したメモリ領域.
///
/// 領域は単一のバイト列によって所有され、その先頭が`start()`のアドレスに対応する.
/// アドレスからバイト列へのアクセスは、全てこの構造体の範囲検査を経由して行われる.
///
/// `HeapRegion::new`を使った場合には、バイト列の実際のメモリ上の位置が開始アドレスとなるため、
/// DMA用メモリ等の物理的なアライメント要件をそのまま扱うことができる.
/// 任意の開始アドレスを割り当てたい場合には`HeapRegion::with_base_address`を使用する.
#[derive(Debug, Clone)]
pub struct HeapRegion {
    base: Address,
    bytes: Vec<u8>,
}
impl HeapRegion {
    /// `bytes`のメモリ上の位置を開始アドレスとする領域を生成する.
    pub fn new(bytes: Vec<u8>) -> Self {
        let base = Address::from(bytes.as_ptr() as usize as u64);
        HeapRegion { base, bytes }
    }

    /// 開始アドレスを`base`とみなす領域を生成する.
    ///
    /// # Errors
    ///
    /// 領域の終端が`u64`で表現できない場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn with_base_address(base: Address, bytes: Vec<u8>) -> Result<Self> {
        track_assert_some!(
            base.checked_add(bytes.len() as u64),
            ErrorKind::InvalidInput,
            "Region end overflows: base={}, size={}",
            base,
            bytes.len()
        );
        Ok(HeapRegion { base, bytes })
    }

    /// 領域の開始アドレスを返す.
    pub fn start(&self) -> Address {
        self.base
    }

    /// 領域の終端アドレスを返す(この位置自体は領域に含まれない).
    pub fn end(&self) -> Address {
        self.base + self.size()
    }

    /// 領域のサイズ(バイト単位)を返す.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// 領域全体のバイト列を返す.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 領域を解体して、内部のバイト列を返す.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// `[address, address + size)`に対応するバイト列の範囲を返す.
    pub(crate) fn offset_range(&self, address: Address, size: u64) -> Result<(usize, usize)> {
        let offset = track_assert_some!(
            address.checked_offset_from(self.base),
            ErrorKind::InvalidInput,
            "Address {} precedes the region start {}",
            address,
            self.base
        );
        let end = track_assert_some!(
            offset.checked_add(size),
            ErrorKind::InvalidInput,
            "Range overflows: address={}, size={}",
            address,
            size
        );
        track_assert!(
            end <= self.size(),
            ErrorKind::InvalidInput,
            "Range exceeds the region: address={}, size={}, region_end={}",
            address,
            size,
            self.end()
        );
        Ok((offset as usize, end as usize))
    }

    /// `[address, address + size)`のバイト列を返す.
    pub(crate) fn slice(&self, address: Address, size: u64) -> Result<&[u8]> {
        let (start, end) = track!(self.offset_range(address, size))?;
        Ok(&self.bytes[start..end])
    }

    /// `[address, address + size)`の可変バイト列を返す.
    pub(crate) fn slice_mut(&mut self, address: Address, size: u64) -> Result<&mut [u8]> {
        let (start, end) = track!(self.offset_range(address, size))?;
        Ok(&mut self.bytes[start..end])
    }
}
