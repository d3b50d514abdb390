//! テーブル全体の走査による統計情報の計算.
use super::{GranuleTable, FULL_WORD, WORD_BITS};

impl<B: AsRef<[u8]>> GranuleTable<B> {
    /// 空きグラニュールの数を返す.
    pub fn count_free(&self) -> u32 {
        (0..self.word_count())
            .map(|i| self.effective_word(i).count_zeros())
            .sum()
    }

    /// 最長の連続した空きグラニュールの数を返す.
    ///
    /// ワード境界を跨いだ連続も一続きとして数えられる.
    pub fn max_free_run(&self) -> u32 {
        let mut longest = 0;
        let mut current = 0;
        for i in 0..self.word_count() {
            let word = self.effective_word(i);
            if word == 0 {
                current += WORD_BITS;
                continue;
            }
            if word == FULL_WORD {
                longest = longest.max(current);
                current = 0;
                continue;
            }

            let mut bit = 0;
            while bit < WORD_BITS {
                let rest = word >> bit;
                let free = rest.trailing_zeros().min(WORD_BITS - bit);
                if free > 0 {
                    current += free;
                    bit += free;
                } else {
                    longest = longest.max(current);
                    current = 0;
                    bit += rest.trailing_ones();
                }
            }
        }
        longest.max(current)
    }

    /// 存在しないグラニュールに対応するビットを割当済み扱いにしたワードを返す.
    fn effective_word(&self, index: usize) -> u32 {
        let word = self.word(index);
        let base = index as u64 * u64::from(WORD_BITS);
        let valid = u64::from(self.granule_count) - base;
        if valid < u64::from(WORD_BITS) {
            word | (FULL_WORD << valid as u32)
        } else {
            word
        }
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::super::{words_for, GranuleState, GranuleTable, WORD_SIZE};

    fn table(granule_count: u32) -> GranuleTable<Vec<u8>> {
        GranuleTable::new(vec![0; words_for(granule_count) * WORD_SIZE], granule_count)
    }

    #[test]
    fn empty_table_works() {
        let table = table(0);
        assert_eq!(table.count_free(), 0);
        assert_eq!(table.max_free_run(), 0);
    }

    #[test]
    fn fresh_table_is_all_free() {
        let t = table(100);
        assert_eq!(t.count_free(), 100);
        assert_eq!(t.max_free_run(), 100);

        let t = table(64);
        assert_eq!(t.count_free(), 64);
        assert_eq!(t.max_free_run(), 64);
    }

    #[test]
    fn max_free_run_works() -> TestResult {
        // 長さ3([0..3))と長さ5([5..10))の空き領域を残す
        let mut table = table(10);
        track!(table.mark(3, 2, GranuleState::Allocated))?;
        assert_eq!(table.count_free(), 8);
        assert_eq!(table.max_free_run(), 5);

        track!(table.mark(6, 1, GranuleState::Allocated))?;
        assert_eq!(table.count_free(), 7);
        assert_eq!(table.max_free_run(), 3);
        Ok(())
    }

    #[test]
    fn run_across_words_is_counted_once() -> TestResult {
        let mut table = table(100);
        track!(table.mark(0, 20, GranuleState::Allocated))?;
        track!(table.mark(90, 10, GranuleState::Allocated))?;

        // [20..90) は三つのワードに跨っている
        assert_eq!(table.count_free(), 70);
        assert_eq!(table.max_free_run(), 70);

        track!(table.mark(50, 1, GranuleState::Allocated))?;
        assert_eq!(table.count_free(), 69);
        assert_eq!(table.max_free_run(), 39);
        Ok(())
    }

    #[test]
    fn fully_allocated_table_has_no_free_run() -> TestResult {
        let mut table = table(40);
        track!(table.mark(0, 32, GranuleState::Allocated))?;
        track!(table.mark(32, 8, GranuleState::Allocated))?;
        assert_eq!(table.count_free(), 0);
        assert_eq!(table.max_free_run(), 0);
        Ok(())
    }
}
