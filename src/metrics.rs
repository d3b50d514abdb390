//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, Gauge, MetricBuilder};

use crate::granule::GranuleSize;

/// グラニュールヒープのメトリクス.
#[derive(Debug, Clone)]
pub struct GranHeapMetrics {
    pub(crate) capacity_granules: Gauge,
    pub(crate) granule_size_bytes: Gauge,
    pub(crate) allocations: Counter,
    pub(crate) allocated_granules_at_starting: Counter,
    pub(crate) allocated_granules_at_running: Counter,
    pub(crate) reserved_granules: Counter,
    pub(crate) releases: Counter,
    pub(crate) released_granules: Counter,
    pub(crate) nospace_failures: Counter,
    pub(crate) inconsistencies: Counter,
}
impl GranHeapMetrics {
    /// ヒープが管理しているグラニュールの総数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// granalloc_heap_capacity_granules <GAUGE>
    /// ```
    pub fn capacity_granules(&self) -> u64 {
        self.capacity_granules.value() as u64
    }

    /// 一グラニュールのバイト数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// granalloc_heap_granule_size_bytes <GAUGE>
    /// ```
    pub fn granule_size_bytes(&self) -> u64 {
        self.granule_size_bytes.value() as u64
    }

    /// 成功した割当の回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// granalloc_heap_allocations_total <COUNTER>
    /// ```
    pub fn allocations(&self) -> u64 {
        self.allocations.value() as u64
    }

    /// これまでに割り当てたグラニュールの数.
    ///
    /// 既存のヒープを開いた時点で割当済みだったグラニュールは`phase="starting"`としてカウントされる.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// granalloc_heap_allocated_granules_total { phase="starting|running" } <COUNTER>
    /// ```
    pub fn allocated_granules(&self) -> u64 {
        self.allocated_granules_at_starting.value() as u64
            + self.allocated_granules_at_running.value() as u64
    }

    /// `reserve`によって予約されたグラニュールの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// granalloc_heap_reserved_granules_total <COUNTER>
    /// ```
    pub fn reserved_granules(&self) -> u64 {
        self.reserved_granules.value() as u64
    }

    /// 解放の回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// granalloc_heap_releases_total <COUNTER>
    /// ```
    pub fn releases(&self) -> u64 {
        self.releases.value() as u64
    }

    /// これまでに解放されたグラニュールの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// granalloc_heap_released_granules_total <COUNTER>
    /// ```
    pub fn released_granules(&self) -> u64 {
        self.released_granules.value() as u64
    }

    /// 使用中のグラニュールの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sum(granalloc_heap_allocated_granules_total) + granalloc_heap_reserved_granules_total - granalloc_heap_released_granules_total
    /// ```
    pub fn usage_granules(&self) -> u64 {
        // NOTE: 以下の順番で値を取得しないとアンダーフローする可能性がある
        let dec = self.released_granules();
        let inc = self.allocated_granules() + self.reserved_granules();
        inc - dec
    }

    /// 空き領域不足による割当失敗回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// granalloc_heap_nospace_failures_total <COUNTER>
    /// ```
    pub fn nospace_failures(&self) -> u64 {
        self.nospace_failures.value() as u64
    }

    /// テーブルの不整合(二重解放等)が検出された回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// granalloc_heap_inconsistencies_total <COUNTER>
    /// ```
    pub fn inconsistencies(&self) -> u64 {
        self.inconsistencies.value() as u64
    }

    pub(crate) fn new(
        builder: &MetricBuilder,
        granule_count: u32,
        granule_size: GranuleSize,
    ) -> Self {
        let mut builder = builder.clone();
        builder.namespace("granalloc").subsystem("heap");
        let metrics = GranHeapMetrics {
            capacity_granules: builder
                .gauge("capacity_granules")
                .help("Number of granules managed by the heap")
                .finish()
                .expect("Never fails"),
            granule_size_bytes: builder
                .gauge("granule_size_bytes")
                .help("Size of a granule")
                .finish()
                .expect("Never fails"),
            allocations: builder
                .counter("allocations_total")
                .help("Number of successful allocations")
                .finish()
                .expect("Never fails"),
            allocated_granules_at_starting: builder
                .counter("allocated_granules_total")
                .help("Number of allocated granules")
                .label("phase", "starting")
                .finish()
                .expect("Never fails"),
            allocated_granules_at_running: builder
                .counter("allocated_granules_total")
                .help("Number of allocated granules")
                .label("phase", "running")
                .finish()
                .expect("Never fails"),
            reserved_granules: builder
                .counter("reserved_granules_total")
                .help("Number of reserved granules")
                .finish()
                .expect("Never fails"),
            releases: builder
                .counter("releases_total")
                .help("Number of releases")
                .finish()
                .expect("Never fails"),
            released_granules: builder
                .counter("released_granules_total")
                .help("Number of released granules")
                .finish()
                .expect("Never fails"),
            nospace_failures: builder
                .counter("nospace_failures_total")
                .help("Number of allocation failures caused by no available space")
                .finish()
                .expect("Never fails"),
            inconsistencies: builder
                .counter("inconsistencies_total")
                .help("Number of detected granule table inconsistencies")
                .finish()
                .expect("Never fails"),
        };
        metrics.capacity_granules.set(f64::from(granule_count));
        metrics
            .granule_size_bytes
            .set(granule_size.as_u64() as f64);
        metrics
    }

    pub(crate) fn count_allocation(&self, granules: u32) {
        self.allocations.increment();
        self.allocated_granules_at_running.add_u64(u64::from(granules));
    }

    pub(crate) fn count_releasion(&self, granules: u32) {
        self.releases.increment();
        self.released_granules.add_u64(u64::from(granules));
    }
}
