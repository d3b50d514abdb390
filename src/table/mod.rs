//! グラニュール割当テーブル(GAT).
//!
//! テーブルは、一グラニュールにつき一ビットを割り当てたビットマップであり、
//! 32bitのワード列として(リトルエンディアンで)バイト列上に格納されている.
//! ビットが立っているグラニュールは割当済み、立っていないグラニュールは空き、を意味する.
//!
//! テーブルが担当するのはビットの計算処理のみで、グラニュールが指すメモリ自体に触れることは無い.
use byteorder::{ByteOrder, LittleEndian};

use crate::granule::MAX_GRANULES_PER_ALLOCATION;
use crate::{ErrorKind, Result};

mod scan;
mod search;

/// テーブルの一ワードのビット数.
pub(crate) const WORD_BITS: u32 = 32;

/// テーブルの一ワードのバイト数.
pub(crate) const WORD_SIZE: usize = 4;

/// 全てのグラニュールが割当済みのワード.
const FULL_WORD: u32 = 0xFFFF_FFFF;

/// `granule_count`個のグラニュールを表現するのに必要なワード数を返す.
pub(crate) fn words_for(granule_count: u32) -> usize {
    ((u64::from(granule_count) + u64::from(WORD_BITS) - 1) / u64::from(WORD_BITS)) as usize
}

/// グラニュールの状態.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GranuleState {
    Free,
    Allocated,
}

/// バイト列`B`上に構築されたグラニュール割当テーブル.
#[derive(Debug)]
pub(crate) struct GranuleTable<B> {
    bytes: B,
    granule_count: u32,
}
impl<B: AsRef<[u8]>> GranuleTable<B> {
    /// `bytes`をテーブルとして扱う.
    ///
    /// # Panics
    ///
    /// `bytes`の長さが`words_for(granule_count)`ワード分に満たない場合には、現在のスレッドがパニックする.
    pub fn new(bytes: B, granule_count: u32) -> Self {
        assert!(
            bytes.as_ref().len() >= words_for(granule_count) * WORD_SIZE,
            "Too small table storage: actual={}, granule_count={}",
            bytes.as_ref().len(),
            granule_count
        );
        GranuleTable {
            bytes,
            granule_count,
        }
    }

    pub fn granule_count(&self) -> u32 {
        self.granule_count
    }

    pub fn word_count(&self) -> usize {
        words_for(self.granule_count)
    }

    pub fn word(&self, index: usize) -> u32 {
        LittleEndian::read_u32(&self.bytes.as_ref()[index * WORD_SIZE..])
    }

    /// `[start, start + count)`の全てのグラニュールが空いているかどうかを判定する.
    ///
    /// `count`に上限はない.
    pub fn is_free_range(&self, start: u32, count: u32) -> bool {
        debug_assert!(u64::from(start) + u64::from(count) <= u64::from(self.granule_count));
        let mut granule = start;
        let end = start + count;
        while granule < end {
            let bit = granule % WORD_BITS;
            let n = (WORD_BITS - bit).min(end - granule);
            let mask = (FULL_WORD >> (WORD_BITS - n)) << bit;
            if self.word((granule / WORD_BITS) as usize) & mask != 0 {
                return false;
            }
            granule += n;
        }
        true
    }

    /// `[start, start + count)`のビットが全て`state`と逆の状態であることを確認する.
    fn check_transition(&self, start: u32, count: u32, state: GranuleState) -> Result<()> {
        for (index, mask) in word_masks(start, count) {
            let word = self.word(index);
            let expected = match state {
                GranuleState::Allocated => 0,
                GranuleState::Free => mask,
            };
            if word & mask != expected {
                track_panic!(
                    ErrorKind::InconsistentState,
                    "Granules {}..{} cannot be marked {:?}: word[{}]={:#010x}, mask={:#010x}",
                    start,
                    start + count,
                    state,
                    index,
                    word,
                    mask
                );
            }
        }
        Ok(())
    }
}
impl<B: AsRef<[u8]> + AsMut<[u8]>> GranuleTable<B> {
    /// 全てのグラニュールを空き状態にする.
    pub fn clear(&mut self) {
        let len = self.word_count() * WORD_SIZE;
        for b in &mut self.bytes.as_mut()[..len] {
            *b = 0;
        }
    }

    fn set_word(&mut self, index: usize, word: u32) {
        LittleEndian::write_u32(&mut self.bytes.as_mut()[index * WORD_SIZE..], word);
    }

    /// `start`番目から`count`個のグラニュールの状態を`state`に変更する.
    ///
    /// 対象範囲が二つのワードに跨る場合には、それぞれのワードに対するマスクを別々に計算する.
    ///
    /// # Errors
    ///
    /// - `count`が`0`または`32`を超える場合や、範囲がテーブル外の場合は`ErrorKind::InvalidInput`
    /// - 対象のビットが既に`state`の状態にある場合は`ErrorKind::InconsistentState`
    ///   - 二重解放や二重割当、サイズ違いの解放を示している
    ///
    /// エラー時にはテーブルは一切変更されない.
    pub fn mark(&mut self, start: u32, count: u32, state: GranuleState) -> Result<()> {
        track_assert!(
            0 < count && count <= MAX_GRANULES_PER_ALLOCATION,
            ErrorKind::InvalidInput,
            "Invalid granule count: {}",
            count
        );
        track_assert!(
            u64::from(start) + u64::from(count) <= u64::from(self.granule_count),
            ErrorKind::InvalidInput,
            "Granules {}..{} exceed the table (granule_count={})",
            start,
            u64::from(start) + u64::from(count),
            self.granule_count
        );

        // 先に全てのワードを検査してから書き換える
        track!(self.check_transition(start, count, state))?;
        for (index, mask) in word_masks(start, count) {
            let word = self.word(index);
            let word = match state {
                GranuleState::Allocated => word | mask,
                GranuleState::Free => word & !mask,
            };
            self.set_word(index, word);
        }
        Ok(())
    }

    /// `[start, start + count)`のグラニュールを全て割当済みにする.
    ///
    /// `mark`とは異なり`count`に上限はなく、32グラニュール毎に分割して処理される.
    ///
    /// # Errors
    ///
    /// 範囲がテーブル外の場合や、範囲内に既に割当済みのグラニュールが存在する場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    /// その際にはテーブルは一切変更されない.
    pub fn reserve(&mut self, start: u32, count: u32) -> Result<()> {
        track_assert!(
            u64::from(start) + u64::from(count) <= u64::from(self.granule_count),
            ErrorKind::InvalidInput,
            "Granules {}..{} exceed the table (granule_count={})",
            start,
            u64::from(start) + u64::from(count),
            self.granule_count
        );
        track_assert!(
            self.is_free_range(start, count),
            ErrorKind::InvalidInput,
            "Granules {}..{} are already in use",
            start,
            start + count
        );

        let end = start + count;
        let mut granule = start;
        while granule < end {
            let n = MAX_GRANULES_PER_ALLOCATION.min(end - granule);
            track!(self.mark(granule, n, GranuleState::Allocated))?;
            granule += n;
        }
        Ok(())
    }
}

/// `[start, start + count)`に対応する(ワード位置, マスク)の列を返す.
///
/// `count`が32以下の場合には、高々二つの要素しか含まれない.
fn word_masks(start: u32, count: u32) -> impl Iterator<Item = (usize, u32)> {
    let end = start + count;
    let mut granule = start;
    std::iter::from_fn(move || {
        if granule >= end {
            return None;
        }
        let index = (granule / WORD_BITS) as usize;
        let bit = granule % WORD_BITS;
        let avail = WORD_BITS - bit;
        let n = avail.min(end - granule);
        let mask = if n == avail {
            FULL_WORD << bit
        } else {
            (FULL_WORD >> (WORD_BITS - n)) << bit
        };
        granule += n;
        Some((index, mask))
    })
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;
    use crate::ErrorKind;

    fn table(granule_count: u32) -> GranuleTable<Vec<u8>> {
        GranuleTable::new(vec![0; words_for(granule_count) * WORD_SIZE], granule_count)
    }

    #[test]
    fn words_for_works() {
        assert_eq!(words_for(0), 0);
        assert_eq!(words_for(1), 1);
        assert_eq!(words_for(32), 1);
        assert_eq!(words_for(33), 2);
        assert_eq!(words_for(u32::max_value()), 1 << 27);
    }

    #[test]
    fn word_masks_works() {
        assert_eq!(word_masks(0, 32).collect::<Vec<_>>(), vec![(0, FULL_WORD)]);
        assert_eq!(word_masks(4, 3).collect::<Vec<_>>(), vec![(0, 0b111_0000)]);
        assert_eq!(
            word_masks(30, 4).collect::<Vec<_>>(),
            vec![(0, 0xC000_0000), (1, 0b11)]
        );
        assert_eq!(
            word_masks(40, 32).collect::<Vec<_>>(),
            vec![(1, 0xFFFF_FF00), (2, 0xFF)]
        );
    }

    #[test]
    fn mark_single_word_works() -> TestResult {
        let mut table = table(64);
        track!(table.mark(3, 5, GranuleState::Allocated))?;
        assert_eq!(table.word(0), 0b1111_1000);
        assert_eq!(table.word(1), 0);

        track!(table.mark(3, 5, GranuleState::Free))?;
        assert_eq!(table.word(0), 0);
        Ok(())
    }

    #[test]
    fn mark_straddling_words_works() -> TestResult {
        let mut table = table(64);
        track!(table.mark(30, 4, GranuleState::Allocated))?;
        assert_eq!(table.word(0), 0xC000_0000);
        assert_eq!(table.word(1), 0b11);

        track!(table.mark(30, 4, GranuleState::Free))?;
        assert_eq!(table.word(0), 0);
        assert_eq!(table.word(1), 0);
        Ok(())
    }

    #[test]
    fn double_allocation_is_detected() -> TestResult {
        let mut table = table(64);
        track!(table.mark(32, 2, GranuleState::Allocated))?;

        // 二つ目のワードだけが衝突する場合でも、一つ目のワードは変更されない
        let e = table.mark(28, 5, GranuleState::Allocated).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InconsistentState));
        assert_eq!(table.word(0), 0);
        assert_eq!(table.word(1), 0b11);

        let e = table.mark(33, 1, GranuleState::Allocated).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InconsistentState));
        Ok(())
    }

    #[test]
    fn double_free_is_detected() -> TestResult {
        let mut table = table(40);
        track!(table.mark(0, 4, GranuleState::Allocated))?;
        track!(table.mark(0, 4, GranuleState::Free))?;

        let e = table.mark(0, 4, GranuleState::Free).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InconsistentState));

        // サイズ違いの解放
        track!(table.mark(8, 2, GranuleState::Allocated))?;
        let e = table.mark(8, 3, GranuleState::Free).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InconsistentState));
        assert_eq!(table.word(0), 0b11_0000_0000);
        Ok(())
    }

    #[test]
    fn out_of_range_mark_is_rejected() {
        let mut table = table(40);
        let e = table.mark(38, 3, GranuleState::Allocated).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        let e = table.mark(0, 33, GranuleState::Allocated).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        let e = table.mark(0, 0, GranuleState::Allocated).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
    }

    #[test]
    fn is_free_range_works() -> TestResult {
        let mut table = table(100);
        track!(table.mark(70, 1, GranuleState::Allocated))?;
        assert!(table.is_free_range(0, 70));
        assert!(!table.is_free_range(0, 71));
        assert!(!table.is_free_range(70, 1));
        assert!(table.is_free_range(71, 29));
        Ok(())
    }

    #[test]
    fn reserve_works() -> TestResult {
        let mut table = table(200);
        track!(table.reserve(10, 100))?;
        assert_eq!(table.word(0), 0xFFFF_FC00);
        assert_eq!(table.word(1), 0xFFFF_FFFF);
        assert_eq!(table.word(2), 0xFFFF_FFFF);
        assert_eq!(table.word(3), 0x3FFF);
        assert!(table.is_free_range(110, 90));

        // 一部でも使用中の範囲は予約できない
        let e = table.reserve(105, 10).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));
        assert!(table.is_free_range(110, 90));

        let e = table.reserve(190, 11).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidInput));

        track!(table.reserve(110, 0))?;
        Ok(())
    }

    #[test]
    #[should_panic]
    fn too_small_storage_is_rejected() {
        let _ = GranuleTable::new(vec![0; 4], 33);
    }
}
