//! Granule Allocator.
//!
//! `granalloc`は、予め確保されたメモリ領域を固定長の"グラニュール"単位で割り当てるためのアロケータ.
//!
//! DMA用のバッファ領域やページ境界に揃えられたヒープ等、
//! サイズやアライメントがある程度揃った割当要求が大量に発行される用途を想定している.
//!
//! # 特徴
//!
//! - 領域の割当状況は、一グラニュールにつき一ビットのビットマップ(グラニュール割当テーブル)で管理される
//!   - テーブルは、管理対象の領域の先頭に埋め込むことも、別のバッファに置くことも可能
//! - "FirstFit"戦略による割当
//!   - 同じ状態のヒープに対する同じ要求は、常に同じアドレスを返す
//!   - 一回の割当で扱えるのは最大で32グラニュールまで
//! - 割当サイズは記録されない
//!   - 解放時には、利用者が割当時と同じサイズを指定する必要がある
//! - 二重解放やサイズ違いの解放は、テーブルを変更する前に検出される
//! - 割当メタデータは領域内に閉じているので、解体した領域から元のヒープを復元することができる
//!
//! # モジュールの依存関係
//!
//! ```text
//! heap => table
//!      => region => address
//!      => granule
//! ```
//!
//! - [heap]モジュール:
//!   - 主に[GranHeap]構造体を提供
//!   - `granalloc`の利用者が直接触るのはこの構造体
//! - [region]モジュール:
//!   - ヒープの管理対象となるメモリ領域を表す[HeapRegion]を提供
//! - [granule]モジュール:
//!   - グラニュールのサイズやアライメントを表す型群を提供
//!
//! # Examples
//!
//! ```
//! # extern crate granalloc;
//! # extern crate trackable;
//! use granalloc::{GranHeap, HeapRegion};
//!
//! # fn main() -> trackable::result::TopLevelResult {
//! // 1MBの領域を、4KBのグラニュール群として管理する
//! let region = HeapRegion::new(vec![0; 1024 * 1024]);
//! let mut heap = GranHeap::initialize(region, 12, 0)?;
//!
//! let a = heap.allocate(1024)?.expect("enough space");
//! let b = heap.allocate(1024)?.expect("enough space");
//! assert_eq!(b - a, 4096);
//!
//! heap.bytes_mut(a, 3)?.copy_from_slice(b"foo");
//! assert_eq!(heap.bytes(a, 3)?, b"foo");
//!
//! heap.free(a, 1024)?;
//! heap.free(b, 1024)?;
//! assert_eq!(heap.info().free_granules, heap.granule_count());
//! # Ok(())
//! # }
//! ```
//!
//! [heap]: ./heap/index.html
//! [GranHeap]: ./heap/struct.GranHeap.html
//! [region]: ./region/index.html
//! [HeapRegion]: ./region/struct.HeapRegion.html
//! [granule]: ./granule/index.html
#![warn(missing_docs)]
extern crate byteorder;
extern crate prometrics;
#[macro_use]
extern crate trackable;
#[macro_use]
extern crate slog;

pub use crate::address::Address;
pub use crate::error::{Error, ErrorKind};
pub use crate::heap::{GranHeap, GranHeapBuilder, GranHeapInfo, HeaderPlacement};
pub use crate::region::HeapRegion;

macro_rules! track_io {
    ($expr:expr) => {
        $expr.map_err(|e: ::std::io::Error| track!(crate::Error::from(e)))
    };
}

pub mod address;
pub mod granule;
pub mod heap;
pub mod metrics;
pub mod region;

mod error;
mod table;

/// crate固有の`Result`型.
pub type Result<T> = std::result::Result<T, Error>;
