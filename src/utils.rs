use core::ops::Range;

pub(crate) trait RangeColumns {
    /// Bounds of column `idx` when the range is cut into `width` equal columns.
    fn column(&self, idx: usize, width: usize) -> Range<u128>;
}

impl RangeColumns for Range<u128> {
    #[inline]
    fn column(&self, idx: usize, width: usize) -> Range<u128> {
        let len = self
            .end
            .checked_sub(self.start)
            .expect("RangeColumns::column");
        let width = width.max(1) as u128;
        let at = |i: u128| self.start + len * i / width;
        at(idx as u128)..at(idx as u128 + 1)
    }
}

/// Length of the intersection of two half-open ranges.
#[inline]
pub(crate) fn overlap(lhs: &Range<u128>, rhs: &Range<u128>) -> u128 {
    lhs.end.min(rhs.end).saturating_sub(lhs.start.max(rhs.start))
}
