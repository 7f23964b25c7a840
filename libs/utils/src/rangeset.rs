// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! A set of non-overlapping ranges of unsigned integers.
//!
//! Address ranges are modelled as sets of integers: an address range starts as a single
//! interval and loses values as the gateway and excluded sub-ranges are carved out of it.

use std::{cmp::Ordering, iter::Sum};

use num_traits::{ConstOne, PrimInt, Unsigned};
use thiserror::Error;

/// Rangeset creation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NewRangeSetError {
    /// A range with `start >= end`.
    #[error("ranges must not be empty")]
    EmptyRange,
    /// Ranges out of order or overlapping.
    #[error("ranges must be non-overlapping and sorted by start")]
    InvalidRanges,
}

/// A set of non-overlapping ranges of unsigned integers, sorted by start.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct RangeSet<T: PrimInt + ConstOne + Unsigned + Sum<T>> {
    ranges: Vec<Range<T>>,
}

impl<T: PrimInt + ConstOne + Unsigned + Sum<T>> RangeSet<T> {
    /// Create a new RangesSet from a vector of ranges. The ranges must be non-empty,
    /// non-overlapping and sorted by start.
    pub fn new(ranges: Vec<Range<T>>) -> Result<Self, NewRangeSetError> {
        if ranges.iter().any(Range::is_empty) {
            return Err(NewRangeSetError::EmptyRange);
        }
        if ranges.windows(2).any(|w| w[0].end > w[1].start) {
            return Err(NewRangeSetError::InvalidRanges);
        }
        Ok(Self { ranges })
    }

    /// Returns true if the range set is empty.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the total number of values in the set.
    pub fn len(&self) -> T {
        self.ranges.iter().map(|range| range.len()).sum()
    }

    /// Returns true if the value is contained in the range set.
    pub fn contains(&self, value: T) -> bool {
        self.ranges
            .binary_search_by(|range| range.compare(&value))
            .is_ok()
    }

    /// Removes every value in the half-open range `[start, end)` from the set and returns
    /// the number of values that were actually removed.
    ///
    /// Values of the range that are not in the set are ignored.
    pub fn remove_range(&mut self, start: T, end: T) -> T {
        if start >= end {
            return T::zero();
        }

        let mut removed = T::zero();
        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for range in self.ranges.drain(..) {
            if range.end <= start || range.start >= end {
                kept.push(range);
                continue;
            }
            let lo = range.start.max(start);
            let hi = range.end.min(end);
            removed = removed + (hi - lo);
            // Whatever survives on either side of the cut.
            if range.start < lo {
                kept.push(Range::new(range.start, lo));
            }
            if hi < range.end {
                kept.push(Range::new(hi, range.end));
            }
        }
        self.ranges = kept;
        removed
    }

    /// Returns the smallest value in the set.
    pub fn first(&self) -> Option<T> {
        self.ranges.first().map(|range| range.start)
    }

    /// Returns the smallest value in the set that is strictly greater than `value`.
    pub fn next_after(&self, value: T) -> Option<T> {
        let successor = value.checked_add(&T::ONE)?;
        // First range that still has values >= successor.
        let i = self.ranges.partition_point(|range| range.end <= successor);
        self.ranges
            .get(i)
            .map(|range| range.start.max(successor))
    }

    /// Returns the ranges in the set.
    pub fn ranges(&self) -> &[Range<T>] {
        &self.ranges
    }
}

/// A half-open range of unsigned integers.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct Range<T: PrimInt + Unsigned> {
    /// Start of the range.
    pub start: T,
    /// End of the range (exclusive).
    pub end: T,
}

impl<T: PrimInt + Unsigned> Range<T> {
    /// Creates a new range.
    pub fn new(start: T, end: T) -> Self {
        Self { start, end }
    }

    /// Compare the range to a value.
    pub fn compare(&self, other: &T) -> Ordering {
        if self.start <= *other && self.end > *other {
            Ordering::Equal
        } else if self.start > *other {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }

    /// Return the length of the range.
    pub fn len(&self) -> T {
        self.end - self.start
    }

    /// Returns true if the range is empty.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn check_rangeset_invariants<T: PrimInt + ConstOne + Unsigned + Sum<T> + std::fmt::Debug>(
        rangeset: &RangeSet<T>,
    ) {
        for range in rangeset.ranges() {
            assert!(range.start < range.end, "Invalid range: {range:?}");
        }
        for pair in rangeset.ranges().windows(2) {
            // Touching ranges are allowed, overlapping ones are not.
            assert!(
                pair[0].end <= pair[1].start,
                "Ranges not ordered or not disjoint: {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn should_reject_invalid_ranges() {
        assert_eq!(
            RangeSet::new(vec![Range::new(5u32, 5)]),
            Err(NewRangeSetError::EmptyRange)
        );
        assert_eq!(
            RangeSet::new(vec![Range::new(10u32, 20), Range::new(1, 11)]),
            Err(NewRangeSetError::InvalidRanges)
        );
        assert_eq!(
            RangeSet::new(vec![Range::new(1u32, 10), Range::new(5, 15)]),
            Err(NewRangeSetError::InvalidRanges)
        );
        assert!(RangeSet::new(vec![Range::new(1u32, 10), Range::new(10, 15)]).is_ok());
    }

    #[test]
    fn should_cut_ranges_on_remove_range() {
        let mut rangeset = RangeSet::new(vec![Range::new(0u32, 10), Range::new(20, 30)]).unwrap();

        // Cut across the gap between the two ranges.
        let removed = rangeset.remove_range(8, 23);
        check_rangeset_invariants(&rangeset);
        assert_eq!(removed, 5);
        assert_eq!(rangeset.ranges(), &[Range::new(0, 8), Range::new(23, 30)]);

        // Cut a hole in the middle.
        assert_eq!(rangeset.remove_range(25, 27), 2);
        check_rangeset_invariants(&rangeset);
        assert_eq!(
            rangeset.ranges(),
            &[Range::new(0, 8), Range::new(23, 25), Range::new(27, 30)]
        );

        // Nothing left to remove here.
        assert_eq!(rangeset.remove_range(10, 20), 0);
        assert_eq!(rangeset.remove_range(7, 7), 0);

        // Remove everything.
        assert_eq!(rangeset.remove_range(0, 100), 13);
        assert!(rangeset.is_empty());
        assert_eq!(rangeset.len(), 0);
    }

    #[test]
    fn should_find_next_value_after() {
        // 2, 3, 4 and 10, 11.
        let rangeset = RangeSet::new(vec![Range::new(2u32, 5), Range::new(10, 12)]).unwrap();

        assert_eq!(rangeset.first(), Some(2));

        assert_eq!(rangeset.next_after(0), Some(2));
        assert_eq!(rangeset.next_after(2), Some(3));
        assert_eq!(rangeset.next_after(4), Some(10));
        assert_eq!(rangeset.next_after(7), Some(10));
        assert_eq!(rangeset.next_after(10), Some(11));
        assert_eq!(rangeset.next_after(11), None);
        assert_eq!(rangeset.next_after(100), None);
    }

    #[test]
    fn should_not_overflow_at_type_boundary() {
        let rangeset = RangeSet::new(vec![Range::new(u8::MAX - 3, u8::MAX)]).unwrap();
        assert_eq!(rangeset.next_after(u8::MAX), None);
        assert_eq!(rangeset.next_after(u8::MAX - 2), Some(u8::MAX - 1));
        assert_eq!(rangeset.next_after(u8::MAX - 1), None);
    }

    #[test]
    fn should_keep_invariants_under_random_removals() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut rangeset = RangeSet::new(vec![Range::new(0u128, 1 << 20)]).unwrap();
        let mut expected = rangeset.len();

        for _ in 0..1000 {
            let start = rng.random_range(0..(1u128 << 20));
            let end = start + rng.random_range(1..64u128);
            let present = (start..end).filter(|v| rangeset.contains(*v)).count() as u128;

            let removed = rangeset.remove_range(start, end);
            check_rangeset_invariants(&rangeset);
            assert_eq!(removed, present, "removed count mismatch for {start}..{end}");

            expected -= removed;
            assert_eq!(rangeset.len(), expected, "remaining length mismatch");
            assert!((start..end).all(|v| !rangeset.contains(v)));
        }

        // Walking the set with next_after visits exactly len() values.
        let mut walked = 0u128;
        let mut cursor = rangeset.first();
        while let Some(value) = cursor {
            walked += 1;
            cursor = rangeset.next_after(value);
        }
        assert_eq!(walked, expected);
    }
}
