//! グラニュールヒープ.
//!
//! 予め確保されたメモリ領域を固定長のグラニュールに分割し、
//! その割当状況をビットマップ(グラニュール割当テーブル)で管理する.
use slog::Logger;

use crate::address::Address;
use crate::granule::{Alignment, GranuleSize};
use crate::metrics::GranHeapMetrics;
use crate::region::HeapRegion;
use crate::table::{GranuleState, GranuleTable};
use crate::{ErrorKind, Result};

pub use self::builder::{GranHeapBuilder, HeaderPlacement};
pub use self::header::{GranHeader, FIXED_HEADER_SIZE, MAGIC_NUMBER};

mod builder;
mod header;

/// グラニュールヒープの統計情報.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GranHeapInfo {
    /// グラニュールの総数.
    pub total_granules: u32,

    /// 空きグラニュールの数.
    pub free_granules: u32,

    /// 最長の連続した空きグラニュールの数.
    ///
    /// 一回の割当で得られる最大のグラニュール数は、この値と`32`の小さい方となる.
    pub max_free_run: u32,
}

/// グラニュールアロケータ.
///
/// [`HeapRegion`]が表すメモリ領域を、[`GranHeapBuilder`]で指定されたサイズのグラニュール単位で割り当てる.
///
/// 割当要求のサイズは常にグラニュール単位に切り上げられ、
/// 一回の割当(および解放)で扱えるのは最大で32グラニュールまで.
///
/// 割当サイズは記録されないため、解放時には割当時と同じサイズを指定する必要がある.
///
/// # 割当戦略
///
/// このアロケータは"FirstFit"戦略を採用している.
///
/// 新規割当要求が発行された際には、テーブルを先頭から走査し、
/// 要求サイズを満たす連続した空きグラニュールの中で、最もアドレスが小さいものが選択される.
///
/// # 排他制御
///
/// インスタンス自体は排他制御を行わないので、複数スレッドから共有する場合には利用者側で
/// `Mutex`等を用いる必要がある.
/// 異なる領域を管理するインスタンス同士は完全に独立している.
///
/// [`HeapRegion`]: ../region/struct.HeapRegion.html
/// [`GranHeapBuilder`]: ./struct.GranHeapBuilder.html
#[derive(Debug)]
pub struct GranHeap {
    region: HeapRegion,
    header: GranHeader,
    detached_header: Option<Vec<u8>>,
    strict_checks: bool,
    logger: Logger,
    metrics: GranHeapMetrics,
}
impl GranHeap {
    /// デフォルト設定で、`region`上にヒープを構築する.
    ///
    /// `GranHeapBuilder::new().granule_log2(granule_log2).alignment_log2(alignment_log2).create(region)`と等価.
    pub fn initialize(region: HeapRegion, granule_log2: u8, alignment_log2: u8) -> Result<Self> {
        track!(GranHeapBuilder::new()
            .granule_log2(granule_log2)
            .alignment_log2(alignment_log2)
            .create(region))
    }

    /// `size`バイト分のメモリを割り当てる.
    ///
    /// 割り当てられたメモリの先頭アドレスが返される.
    /// 実際に確保される領域は、`size`をグラニュール単位に切り上げたものとなる.
    ///
    /// 十分な空きが存在しない場合には`Ok(None)`が返される.
    /// `size`が`0`の場合には、テーブルを走査せずに`Ok(None)`が返される.
    ///
    /// # Errors
    ///
    /// `size`が32グラニュール分を超える場合には、種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn allocate(&mut self, size: usize) -> Result<Option<Address>> {
        if size == 0 {
            return Ok(None);
        }
        let count = track!(self.granules_for(size))?;
        let result = self.table_mut().allocate(count);
        let allocated = track!(self.check_consistency(result))?;
        if let Some(index) = allocated {
            let address = self.address_of(index);
            self.metrics.count_allocation(count);
            debug!(self.logger, "Allocated"; "address" => %address, "size" => size, "granules" => count);
            Ok(Some(address))
        } else {
            self.metrics.nospace_failures.increment();
            debug!(self.logger, "No space"; "size" => size, "granules" => count);
            Ok(None)
        }
    }

    /// `allocate`で割り当てたメモリを解放する.
    ///
    /// `size`には、割当時と同じ(同じグラニュール数に切り上げられる)値を指定する必要がある.
    /// `size`が`0`の場合には何も行わない.
    ///
    /// # Errors
    ///
    /// 以下の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される:
    ///
    /// - `size`が32グラニュール分を超える
    /// - `address`がヒープ外、もしくはグラニュール境界に沿っていない
    /// - 解放範囲がヒープの終端を超えている
    ///
    /// 対象のグラニュールが割当済みではない場合(二重解放やサイズ違い)には、
    /// 種類が`ErrorKind::InconsistentState`のエラーが返される.
    /// `strict_checks`が有効な場合には、エラーを返す代わりにパニックする.
    pub fn free(&mut self, address: Address, size: usize) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let count = track!(self.granules_for(size))?;
        let index = track!(self.granule_index_of(address))?;
        let result = self.table_mut().mark(index, count, GranuleState::Free);
        track!(self.check_consistency(result))?;

        self.metrics.count_releasion(count);
        debug!(self.logger, "Freed"; "address" => %address, "size" => size, "granules" => count);
        Ok(())
    }

    /// `[address, address + size)`と重なる全てのグラニュールを割当済みにする.
    ///
    /// ブートローダ等によって既に使用されているメモリを、ヒープから除外するために使用する.
    /// 範囲の先頭はグラニュール境界に切り下げられ、終端は切り上げられる.
    /// 32グラニュールの制限は無い.
    ///
    /// 予約したグラニュールは、`free`によって(32グラニュール以下の単位で)解放することができる.
    ///
    /// # Errors
    ///
    /// 範囲がヒープ外の場合や、範囲内に既に割当済みのグラニュールが存在する場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn reserve(&mut self, address: Address, size: usize) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let (start, end) = track!(self.heap_offset_range(address, size as u64))?;
        let granule_size = self.granule_size();
        let first = (granule_size.floor_align(start) >> granule_size.log2()) as u32;
        let last = (granule_size.ceil_align(end) >> granule_size.log2()) as u32;
        let count = last - first;

        let result = self.table_mut().reserve(first, count);
        track!(self.check_consistency(result))?;

        self.metrics.reserved_granules.add_u64(u64::from(count));
        debug!(self.logger, "Reserved"; "address" => %address, "size" => size, "granules" => count);
        Ok(())
    }

    /// ヒープの統計情報を返す.
    ///
    /// テーブル全体を走査するため、グラニュール数に比例した時間が掛かる.
    pub fn info(&self) -> GranHeapInfo {
        let table = self.table();
        GranHeapInfo {
            total_granules: table.granule_count(),
            free_granules: table.count_free(),
            max_free_run: table.max_free_run(),
        }
    }

    /// ヒープを解体して、管理していた領域を返す.
    ///
    /// ヘッダが領域とは別に確保されていた場合には、それも解放される.
    /// ヘッダが領域内に埋め込まれている場合には、領域はヘッダを含んだまま返されるので、
    /// `GranHeapBuilder::open`を使って再びヒープとして扱うことができる.
    pub fn release(self) -> HeapRegion {
        info!(
            self.logger,
            "Granule heap released";
            "heap_start" => %self.header.heap_start,
            "granule_count" => self.header.granule_count,
            "detached_header" => self.detached_header.is_some()
        );
        self.region
    }

    /// `[address, address + size)`のメモリを返す.
    ///
    /// 範囲はグラニュール群が占める領域内に収まっている必要があり、ヘッダにアクセスすることはできない.
    /// 割当状況の確認は行わない.
    pub fn bytes(&self, address: Address, size: usize) -> Result<&[u8]> {
        track!(self.heap_offset_range(address, size as u64))?;
        track!(self.region.slice(address, size as u64))
    }

    /// `[address, address + size)`のメモリを可変で返す.
    ///
    /// 範囲の制約は`bytes`と同様.
    pub fn bytes_mut(&mut self, address: Address, size: usize) -> Result<&mut [u8]> {
        track!(self.heap_offset_range(address, size as u64))?;
        track!(self.region.slice_mut(address, size as u64))
    }

    /// 最初のグラニュールのアドレスを返す.
    pub fn heap_start(&self) -> Address {
        self.header.heap_start
    }

    /// グラニュールのサイズを返す.
    pub fn granule_size(&self) -> GranuleSize {
        self.header.granule_size
    }

    /// ヒープの開始位置のアライメントを返す.
    pub fn alignment(&self) -> Alignment {
        self.header.alignment
    }

    /// グラニュールの総数を返す.
    pub fn granule_count(&self) -> u32 {
        self.header.granule_count
    }

    /// ヘッダ情報を返す.
    pub fn header(&self) -> &GranHeader {
        &self.header
    }

    /// ヘッダの配置方法を返す.
    pub fn header_placement(&self) -> HeaderPlacement {
        if self.detached_header.is_some() {
            HeaderPlacement::Detached
        } else {
            HeaderPlacement::Embedded
        }
    }

    /// 管理対象の領域を返す.
    pub fn region(&self) -> &HeapRegion {
        &self.region
    }

    /// ヒープのメトリクスを返す.
    pub fn metrics(&self) -> &GranHeapMetrics {
        &self.metrics
    }

    pub(crate) fn table(&self) -> GranuleTable<&[u8]> {
        let (start, end) = self.header.table_range();
        let bytes = match self.detached_header {
            Some(ref buf) => &buf[start..end],
            None => &self.region.as_bytes()[start..end],
        };
        GranuleTable::new(bytes, self.header.granule_count)
    }

    fn table_mut(&mut self) -> GranuleTable<&mut [u8]> {
        let (start, end) = self.header.table_range();
        let bytes = match self.detached_header {
            Some(ref mut buf) => &mut buf[start..end],
            None => &mut self.region.as_bytes_mut()[start..end],
        };
        GranuleTable::new(bytes, self.header.granule_count)
    }

    fn granules_for(&self, size: usize) -> Result<u32> {
        let granule_size = self.granule_size();
        track_assert!(
            size as u64 <= granule_size.max_allocation_size(),
            ErrorKind::InvalidInput,
            "Too large request: size={}, max={}",
            size,
            granule_size.max_allocation_size()
        );
        Ok(granule_size.granules(size as u64) as u32)
    }

    fn granule_index_of(&self, address: Address) -> Result<u32> {
        let offset = track_assert_some!(
            address.checked_offset_from(self.heap_start()),
            ErrorKind::InvalidInput,
            "Address {} precedes the heap start {}",
            address,
            self.heap_start()
        );
        track_assert!(
            self.granule_size().is_aligned(offset),
            ErrorKind::InvalidInput,
            "Address {} is not on a granule boundary",
            address
        );
        let index = offset >> self.granule_size().log2();
        track_assert!(
            index < u64::from(self.granule_count()),
            ErrorKind::InvalidInput,
            "Address {} is beyond the heap end {}",
            address,
            self.header.heap_end()
        );
        Ok(index as u32)
    }

    fn address_of(&self, index: u32) -> Address {
        self.heap_start() + (u64::from(index) << self.granule_size().log2())
    }

    /// `[address, address + size)`をヒープ先頭からのオフセット範囲に変換する.
    fn heap_offset_range(&self, address: Address, size: u64) -> Result<(u64, u64)> {
        let start = track_assert_some!(
            address.checked_offset_from(self.heap_start()),
            ErrorKind::InvalidInput,
            "Address {} precedes the heap start {}",
            address,
            self.heap_start()
        );
        let end = track_assert_some!(start.checked_add(size), ErrorKind::InvalidInput);
        track_assert!(
            end <= self.header.heap_size(),
            ErrorKind::InvalidInput,
            "Range exceeds the heap: address={}, size={}, heap_end={}",
            address,
            size,
            self.header.heap_end()
        );
        Ok((start, end))
    }

    fn check_consistency<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            if *e.kind() == ErrorKind::InconsistentState {
                self.metrics.inconsistencies.increment();
                error!(self.logger, "Granule table inconsistency detected"; "error" => %e);
                if self.strict_checks {
                    panic!("Granule table inconsistency: {}", e);
                }
            }
        }
        track!(result)
    }
}
