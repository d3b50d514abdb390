use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};

use super::header::{compute_layout, GranHeader, FIXED_HEADER_SIZE};
use super::GranHeap;
use crate::granule::{Alignment, GranuleSize};
use crate::metrics::GranHeapMetrics;
use crate::region::HeapRegion;
use crate::table::GranuleTable;
use crate::{ErrorKind, Result};

/// ヘッダ(およびグラニュール割当テーブル)の配置方法.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPlacement {
    /// ヘッダを、管理対象の領域の先頭に配置する.
    ///
    /// ヘッダが占める部分は、グラニュールとしては割り当てられない.
    Embedded,

    /// ヘッダを、管理対象の領域とは別のバッファに配置する.
    ///
    /// 領域全体をグラニュールとして使用できるが、ヘッダ分のメモリが別途必要となる.
    Detached,
}
impl Default for HeaderPlacement {
    fn default() -> Self {
        HeaderPlacement::Embedded
    }
}

/// `GranHeap`のビルダ.
#[derive(Debug, Clone)]
pub struct GranHeapBuilder {
    granule_log2: u8,
    alignment_log2: u8,
    placement: HeaderPlacement,
    strict_checks: bool,
    logger: Logger,
    metrics: MetricBuilder,
}
impl GranHeapBuilder {
    /// 新しい`GranHeapBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        GranHeapBuilder {
            granule_log2: 12,
            alignment_log2: 0,
            placement: HeaderPlacement::default(),
            strict_checks: false,
            logger: Logger::root(Discard, o!()),
            metrics: MetricBuilder::new(),
        }
    }

    /// グラニュールのサイズを`2^log2`バイトに設定する.
    ///
    /// 取り得る値は`1..=31`で、範囲外の値が指定された場合には、ヒープの構築時にエラーが返される.
    /// 大きなグラニュールほど管理コストは小さくなるが、割当時の端数による無駄は大きくなる.
    ///
    /// デフォルト値は`12`(4KB).
    pub fn granule_log2(&mut self, log2: u8) -> &mut Self {
        self.granule_log2 = log2;
        self
    }

    /// ヒープの開始位置に要求されるアライメントを`2^log2`バイトに設定する.
    ///
    /// この値は`granule_log2`以下である必要がある.
    /// DMA用メモリ等、ハードウェア的なアライメント要件がない限りは`0`のままで良い.
    ///
    /// デフォルト値は`0`.
    pub fn alignment_log2(&mut self, log2: u8) -> &mut Self {
        self.alignment_log2 = log2;
        self
    }

    /// ヘッダの配置方法を設定する.
    ///
    /// デフォルト値は`HeaderPlacement::Embedded`.
    pub fn header_placement(&mut self, placement: HeaderPlacement) -> &mut Self {
        self.placement = placement;
        self
    }

    /// テーブルの不整合(二重解放等)の検出時に、エラーを返す代わりにパニックするかどうかを設定する.
    ///
    /// 開発時に問題を早期に発見するためのもの.
    ///
    /// デフォルト値は`false`.
    pub fn strict_checks(&mut self, enabled: bool) -> &mut Self {
        self.strict_checks = enabled;
        self
    }

    /// ロガーを設定する.
    ///
    /// デフォルト値は`Logger::root(Discard, o!())`.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// `region`上に新規にヒープを構築する.
    ///
    /// 全てのグラニュールは空き状態で初期化される.
    ///
    /// # Errors
    ///
    /// 以下の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される:
    ///
    /// - `region`が空
    /// - `granule_log2`もしくは`alignment_log2`が範囲外
    /// - `alignment_log2`が`granule_log2`より大きい
    /// - `HeaderPlacement::Embedded`の場合に、`region`がヘッダを格納できないほど小さい
    pub fn create(&self, mut region: HeapRegion) -> Result<GranHeap> {
        let granule_size = track!(GranuleSize::new(self.granule_log2))?;
        let alignment = track!(Alignment::new(self.alignment_log2))?;
        track_assert!(
            alignment.fits_in(granule_size),
            ErrorKind::InvalidInput,
            "Alignment exceeds the granule size: granule_log2={}, alignment_log2={}",
            self.granule_log2,
            self.alignment_log2
        );
        track_assert!(region.size() > 0, ErrorKind::InvalidInput, "Empty region");

        let (heap_start, granule_count) = track!(compute_layout(
            region.start(),
            region.size(),
            granule_size,
            alignment
        ))?;
        let header_size = GranHeader::calc_region_size(granule_count);

        let (header, detached) = match self.placement {
            HeaderPlacement::Embedded => {
                track_assert!(
                    header_size <= region.size(),
                    ErrorKind::InvalidInput,
                    "Too small region: size={}, header_size={}",
                    region.size(),
                    header_size
                );

                // ヘッダの後ろ側だけをグラニュールとして使う
                let (heap_start, granule_count) = track!(compute_layout(
                    region.start() + header_size,
                    region.size() - header_size,
                    granule_size,
                    alignment
                ))?;
                let header = GranHeader {
                    granule_size,
                    alignment,
                    granule_count,
                    heap_start,
                };
                let buf = &mut region.as_bytes_mut()[..header_size as usize];
                track!(initialize_header(buf, &header))?;
                (header, None)
            }
            HeaderPlacement::Detached => {
                let header = GranHeader {
                    granule_size,
                    alignment,
                    granule_count,
                    heap_start,
                };
                let mut buf = vec![0; header_size as usize];
                track!(initialize_header(&mut buf, &header))?;
                (header, Some(buf))
            }
        };

        info!(
            self.logger,
            "Granule heap created";
            "region_start" => %region.start(),
            "region_size" => region.size(),
            "heap_start" => %header.heap_start,
            "granule_size" => header.granule_size.as_u64(),
            "granule_count" => header.granule_count,
            "placement" => ?self.placement
        );
        let metrics = GranHeapMetrics::new(&self.metrics, header.granule_count, granule_size);
        Ok(GranHeap {
            region,
            header,
            detached_header: detached,
            strict_checks: self.strict_checks,
            logger: self.logger.clone(),
            metrics,
        })
    }

    /// `HeaderPlacement::Embedded`で構築済みのヒープを、`region`から復元する.
    ///
    /// `region`の先頭のヘッダとテーブルがそのまま使われるため、
    /// `GranHeap::release`で返された領域を渡せば、割当状況も含めて元のヒープが得られる.
    ///
    /// グラニュールサイズやアライメントは、このビルダの設定値ではなく、ヘッダに格納されている値が使われる.
    ///
    /// # Errors
    ///
    /// ヘッダが存在しない場合や、ヘッダの内容が`region`と矛盾している場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn open(&self, region: HeapRegion) -> Result<GranHeap> {
        track_assert!(
            region.size() >= FIXED_HEADER_SIZE,
            ErrorKind::InvalidInput,
            "Too small region: {}",
            region.size()
        );
        let header = track!(GranHeader::read_from(region.as_bytes()))?;

        let header_size = header.region_size();
        let header_end = track_assert_some!(
            region.start().checked_add(header_size),
            ErrorKind::InvalidInput
        );
        track_assert!(
            header_size <= region.size() && header_end <= header.heap_start,
            ErrorKind::InvalidInput,
            "Heap overlaps the header: heap_start={}, header_end={}",
            header.heap_start,
            header_end
        );
        track_assert!(
            header
                .heap_start
                .checked_add(header.heap_size())
                .map_or(false, |end| end <= region.end()),
            ErrorKind::InvalidInput,
            "Heap exceeds the region: heap_start={}, granule_count={}, region_end={}",
            header.heap_start,
            header.granule_count,
            region.end()
        );

        let metrics = GranHeapMetrics::new(&self.metrics, header.granule_count, header.granule_size);
        let heap = GranHeap {
            region,
            header,
            detached_header: None,
            strict_checks: self.strict_checks,
            logger: self.logger.clone(),
            metrics,
        };
        let in_use = heap.granule_count() - heap.table().count_free();
        heap.metrics
            .allocated_granules_at_starting
            .add_u64(u64::from(in_use));
        info!(
            heap.logger,
            "Granule heap opened";
            "heap_start" => %heap.heap_start(),
            "granule_size" => heap.granule_size().as_u64(),
            "granule_count" => heap.granule_count(),
            "in_use" => in_use
        );
        Ok(heap)
    }
}
impl Default for GranHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// ヘッダの固定長部分を書き込み、テーブルをゼロで初期化する.
fn initialize_header(buf: &mut [u8], header: &GranHeader) -> Result<()> {
    track!(header.write_to(&mut buf[..]))?;
    let (start, end) = header.table_range();
    GranuleTable::new(&mut buf[start..end], header.granule_count).clear();
    Ok(())
}
