//! 連続した空きグラニュールの探索.
use super::{GranuleState, GranuleTable, FULL_WORD, WORD_BITS};
use crate::granule::MAX_GRANULES_PER_ALLOCATION;
use crate::{ErrorKind, Result};

impl<B: AsRef<[u8]>> GranuleTable<B> {
    /// `count`個の連続した空きグラニュールを探し、その先頭のグラニュール番号を返す.
    ///
    /// 探索は"FirstFit"戦略で行われる(i.e., 条件を満たす中で最も番号が小さいものが選ばれる).
    ///
    /// テーブルはワード単位で走査される.
    /// 各ワードについては、次のワードと連結した64bitの窓を作った上で、
    /// 下位ビットが全て割当済みである範囲を16/8/4/2ビット単位の判定で読み飛ばしつつ、
    /// 候補位置を進めていく.
    /// これにより、ワード境界を跨ぐ空き領域も検出される.
    ///
    /// `count`は`1..=32`の範囲である必要がある.
    pub fn find_free_run(&self, count: u32) -> Option<u32> {
        debug_assert!(0 < count && count <= MAX_GRANULES_PER_ALLOCATION);
        let mask = u64::from(FULL_WORD >> (WORD_BITS - count));
        let granule_count = u64::from(self.granule_count);

        for word_index in 0..self.word_count() {
            let curr = self.word(word_index);
            if curr == FULL_WORD {
                continue;
            }

            // 最後のワードの後ろには、割当可能なグラニュールは存在しない
            let next = if word_index + 1 < self.word_count() {
                self.word(word_index + 1)
            } else {
                FULL_WORD
            };
            let mut window = u64::from(curr) | (u64::from(next) << WORD_BITS);

            let base = word_index as u64 * u64::from(WORD_BITS);
            let mut bit_index = 0;
            while bit_index < WORD_BITS
                && base + u64::from(bit_index) + u64::from(count) <= granule_count
            {
                let low = window as u32;
                let shift = if low == FULL_WORD {
                    // 残りの空きビットは、全て窓の外に追い出された
                    break;
                } else if low & 0xFFFF == 0xFFFF {
                    16
                } else if low & 0xFF == 0xFF {
                    8
                } else if low & 0xF == 0xF {
                    4
                } else if low & 0x3 == 0x3 {
                    2
                } else if window & mask == 0 {
                    return Some(base as u32 + bit_index);
                } else {
                    1
                };
                window >>= shift;
                bit_index += shift;
            }
        }
        None
    }
}
impl<B: AsRef<[u8]> + AsMut<[u8]>> GranuleTable<B> {
    /// `count`個の連続した空きグラニュールを探して割当済みにする.
    ///
    /// 割当に成功した場合には、その先頭のグラニュール番号が返される.
    /// 十分な空きが存在しない場合には`None`が返される.
    pub fn allocate(&mut self, count: u32) -> Result<Option<u32>> {
        track_assert!(
            0 < count && count <= MAX_GRANULES_PER_ALLOCATION,
            ErrorKind::InvalidInput,
            "Invalid granule count: {}",
            count
        );
        if let Some(start) = self.find_free_run(count) {
            track!(self.mark(start, count, GranuleState::Allocated))?;
            Ok(Some(start))
        } else {
            Ok(None)
        }
    }
}
