//! Approximate-median bulk eviction
//!
//! Evicting only the single lightest entry costs O(N) per insertion once the
//! log is full, and the entry that just arrived would be the next victim
//! every time. Instead, one O(N) pass drops every entry at or below an
//! estimated median, so the next ~N/2 insertions are free and new backtraces
//! get time to accumulate weight before the next round.

use super::BacktraceLog;

/// Estimate the median of `weights` by recursive median-of-three.
///
/// The slice is split into three near-equal groups (`N/3`, `N/3` and the
/// remainder), each group's median is estimated recursively, and the median
/// of the three estimates is returned. For two values the result is their
/// floor average, which suits eviction better than picking either one.
///
/// Runs in O(N) time (`T(N) = 3·T(N/3) + O(1)`) without allocating.
/// Returns 0 for an empty slice.
#[must_use]
pub fn approximate_median(weights: &[u64]) -> u64 {
    match *weights {
        [] => 0,
        [only] => only,
        [a, b] => a.midpoint(b),
        _ => {
            let third = weights.len() / 3;
            let first = approximate_median(&weights[..third]);
            let second = approximate_median(&weights[third..2 * third]);
            let rest = approximate_median(&weights[2 * third..]);
            median_of_three(first, second, rest)
        }
    }
}

fn median_of_three(a: u64, b: u64, c: u64) -> u64 {
    if a < b {
        if b < c {
            b
        } else if a < c {
            c
        } else {
            a
        }
    } else if a < c {
        a
    } else if b < c {
        c
    } else {
        b
    }
}

impl BacktraceLog {
    /// Drop every entry whose weight is at or below the approximate median.
    ///
    /// Only called with every row occupied. Using `<=` guarantees progress
    /// even when all weights are equal. Freed rows are cleared and returned
    /// to the free-list; their weight is discarded. Returns the number of
    /// entries removed.
    pub(crate) fn evict_lower_half(&mut self) -> usize {
        debug_assert!(self.free.is_empty(), "eviction on a log with free rows");

        let median = approximate_median(&self.weights);
        let rows = u32::try_from(self.capacity()).unwrap_or(u32::MAX);
        let mut removed = 0;
        for row in 0..rows {
            let r = row as usize;
            if self.occupied[r] && self.weights[r] <= median {
                self.release_row(row);
                removed += 1;
            }
        }
        self.evictions += 1;
        removed
    }
}
