//! Bounded backtrace histogram
//!
//! A [`BacktraceLog`] maps fixed-length backtraces to accumulated weights
//! (milliseconds for CPU logs, bytes for memory logs). Everything it will ever
//! need is allocated up front in [`BacktraceLog::new`], so recording into it
//! is safe from a signal handler or from inside an allocator hook.
//!
//! ## Layout
//!
//! ```text
//!  frames   [ row 0: f f f 0 | row 1: f f 0 0 | ... | row C-1 ]   C × D arena
//!  weights  [ w0 | w1 | ... ]                                       one per row
//!  chain    [ NIL | 0 | ... ]        next row with the same key hash
//!  free     [ C-1, C-2, ... ]        rows not holding an entry
//!  index    HashMap<hash, head row>  reserved for 2 × C keys
//! ```
//!
//! The index never owns a key: it maps the key hash to the first row of a
//! collision chain threaded through `chain`, and equality is checked against
//! the arena rows. Because the map is reserved for twice the number of rows
//! it can ever hold, tombstones left by eviction are cleaned up by an in-place
//! rehash rather than a reallocation.
//!
//! When a new key arrives and no row is free, [`eviction`] drops roughly the
//! lighter half of the entries, which amortizes to O(1) per insertion.

pub mod eviction;

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hasher};

use crate::domain::{FrameId, SlotId};

pub use eviction::approximate_median;

/// End of a collision chain.
const NIL: u32 = u32::MAX;

/// Fixed-capacity histogram of backtraces.
pub struct BacktraceLog {
    depth: usize,
    frames: Box<[FrameId]>,
    weights: Box<[u64]>,
    hashes: Box<[u64]>,
    chain: Box<[u32]>,
    occupied: Box<[bool]>,
    free: Vec<u32>,
    index: HashMap<u64, u32>,
    hasher: RandomState,
    /// Working row the recorder captures the live stack into.
    scratch: Box<[FrameId]>,
    evictions: u64,
}

impl BacktraceLog {
    /// Create an empty log able to hold `capacity` backtraces of `depth` frames.
    ///
    /// Both dimensions are clamped to at least 1; the capacity is clamped to
    /// the range addressable by 32-bit row handles.
    #[must_use]
    pub fn new(capacity: usize, depth: usize) -> Self {
        let capacity = capacity.clamp(1, NIL as usize);
        let depth = depth.max(1);

        let rows = u32::try_from(capacity).unwrap_or(NIL);
        let mut free = Vec::with_capacity(capacity);
        // Pop order hands out row 0 first
        free.extend((0..rows).rev());

        Self {
            depth,
            frames: vec![FrameId::NULL; capacity * depth].into_boxed_slice(),
            weights: vec![0; capacity].into_boxed_slice(),
            hashes: vec![0; capacity].into_boxed_slice(),
            chain: vec![NIL; capacity].into_boxed_slice(),
            occupied: vec![false; capacity].into_boxed_slice(),
            free,
            index: HashMap::with_capacity(capacity.saturating_mul(2)),
            hasher: RandomState::new(),
            scratch: vec![FrameId::NULL; depth].into_boxed_slice(),
            evictions: 0,
        }
    }

    /// Maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.weights.len()
    }

    /// Frames per backtrace
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of entries currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.capacity() - self.free.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of eviction rounds this log has gone through
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Find the entry for `frames`, creating it with weight 0 if absent.
    ///
    /// `frames` is read as a backtrace of exactly [`depth`](Self::depth)
    /// frames: missing trailing frames count as [`FrameId::NULL`] and frames
    /// past the depth are ignored. Inserting a new key into a full log first
    /// evicts the lighter entries; updating an existing key never evicts.
    ///
    /// Does not allocate.
    pub fn lookup_or_create_slot(&mut self, frames: &[FrameId]) -> SlotId {
        let hash = self.hash_key(frames);
        if let Some(row) = self.find(hash, frames) {
            return SlotId(row);
        }

        // Eviction frees at least one row whenever the log is full
        let row = loop {
            if let Some(row) = self.free.pop() {
                break row;
            }
            self.evict_lower_half();
        };

        let r = row as usize;
        let depth = self.depth;
        for (i, slot) in self.frames[r * depth..(r + 1) * depth].iter_mut().enumerate() {
            *slot = frames.get(i).copied().unwrap_or(FrameId::NULL);
        }
        self.weights[r] = 0;
        self.hashes[r] = hash;
        self.occupied[r] = true;
        self.chain[r] = self.index.get(&hash).copied().unwrap_or(NIL);
        self.index.insert(hash, row);

        SlotId(row)
    }

    /// Add `weight` to the entry at `slot`, saturating at `u64::MAX`.
    pub fn increment(&mut self, slot: SlotId, weight: u64) {
        if let Some(current) = self.weights.get_mut(slot.index()) {
            *current = current.saturating_add(weight);
        }
    }

    /// Weight recorded for `frames`, if it has an entry.
    #[must_use]
    pub fn weight_of(&self, frames: &[FrameId]) -> Option<u64> {
        let row = self.find(self.hash_key(frames), frames)?;
        Some(self.weights[row as usize])
    }

    /// Iterate over `(backtrace, weight)` pairs in row order.
    pub fn entries(&self) -> impl Iterator<Item = (&[FrameId], u64)> + '_ {
        (0..self.capacity())
            .filter(|&r| self.occupied[r])
            .map(|r| (self.row(r), self.weights[r]))
    }

    /// Sum of all weights, saturating.
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.entries().fold(0u64, |acc, (_, w)| acc.saturating_add(w))
    }

    pub(crate) fn take_scratch(&mut self) -> Box<[FrameId]> {
        std::mem::take(&mut self.scratch)
    }

    pub(crate) fn restore_scratch(&mut self, scratch: Box<[FrameId]>) {
        self.scratch = scratch;
    }

    fn row(&self, r: usize) -> &[FrameId] {
        &self.frames[r * self.depth..(r + 1) * self.depth]
    }

    fn hash_key(&self, frames: &[FrameId]) -> u64 {
        let mut state = self.hasher.build_hasher();
        for i in 0..self.depth {
            state.write_u64(frames.get(i).map_or(FrameId::NULL.0, |f| f.0));
        }
        state.finish()
    }

    fn find(&self, hash: u64, frames: &[FrameId]) -> Option<u32> {
        let mut row = *self.index.get(&hash)?;
        while row != NIL {
            let stored = self.row(row as usize);
            let equal = stored
                .iter()
                .enumerate()
                .all(|(i, f)| *f == frames.get(i).copied().unwrap_or(FrameId::NULL));
            if equal {
                return Some(row);
            }
            row = self.chain[row as usize];
        }
        None
    }

    /// Unlink `row` from the index and hand it back to the free-list.
    fn release_row(&mut self, row: u32) {
        let r = row as usize;
        let hash = self.hashes[r];
        let next = self.chain[r];

        match self.index.get(&hash).copied() {
            Some(head) if head == row => {
                if next == NIL {
                    self.index.remove(&hash);
                } else {
                    self.index.insert(hash, next);
                }
            }
            Some(mut prev) => {
                while prev != NIL && self.chain[prev as usize] != row {
                    prev = self.chain[prev as usize];
                }
                if prev != NIL {
                    self.chain[prev as usize] = next;
                }
            }
            None => {}
        }

        let depth = self.depth;
        self.frames[r * depth..(r + 1) * depth].fill(FrameId::NULL);
        self.weights[r] = 0;
        self.hashes[r] = 0;
        self.chain[r] = NIL;
        self.occupied[r] = false;
        self.free.push(row);
    }
}

impl fmt::Debug for BacktraceLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacktraceLog")
            .field("capacity", &self.capacity())
            .field("depth", &self.depth)
            .field("len", &self.len())
            .field("evictions", &self.evictions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bt(frames: &[u64]) -> Vec<FrameId> {
        frames.iter().copied().map(FrameId).collect()
    }

    #[test]
    fn test_new_log_is_empty() {
        let log = BacktraceLog::new(4, 3);
        assert_eq!(log.capacity(), 4);
        assert_eq!(log.depth(), 3);
        assert!(log.is_empty());
        assert_eq!(log.entries().count(), 0);
    }

    #[test]
    fn test_zero_dimensions_are_clamped() {
        let log = BacktraceLog::new(0, 0);
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.depth(), 1);
    }

    #[test]
    fn test_existing_key_reuses_slot() {
        let mut log = BacktraceLog::new(4, 3);
        let a = log.lookup_or_create_slot(&bt(&[1, 2, 3]));
        log.increment(a, 5);
        let again = log.lookup_or_create_slot(&bt(&[1, 2, 3]));
        log.increment(again, 7);

        assert_eq!(a, again);
        assert_eq!(log.len(), 1);
        assert_eq!(log.weight_of(&bt(&[1, 2, 3])), Some(12));
    }

    #[test]
    fn test_short_key_equals_padded_key() {
        let mut log = BacktraceLog::new(4, 4);
        let short = log.lookup_or_create_slot(&bt(&[9, 8]));
        let padded = log.lookup_or_create_slot(&bt(&[9, 8, 0, 0]));
        assert_eq!(short, padded);

        let (frames, _) = log.entries().next().unwrap();
        assert_eq!(frames, bt(&[9, 8, 0, 0]).as_slice());
    }

    #[test]
    fn test_long_key_is_truncated() {
        let mut log = BacktraceLog::new(4, 2);
        let slot = log.lookup_or_create_slot(&bt(&[1, 2, 3, 4]));
        log.increment(slot, 1);
        assert_eq!(log.weight_of(&bt(&[1, 2])), Some(1));
        assert!(log.entries().all(|(frames, _)| frames.len() == 2));
    }

    #[test]
    fn test_padding_is_part_of_the_key() {
        let mut log = BacktraceLog::new(4, 3);
        log.lookup_or_create_slot(&bt(&[1, 2]));
        log.lookup_or_create_slot(&bt(&[1, 2, 3]));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_increment_saturates() {
        let mut log = BacktraceLog::new(2, 1);
        let slot = log.lookup_or_create_slot(&bt(&[1]));
        log.increment(slot, u64::MAX - 1);
        log.increment(slot, 10);
        assert_eq!(log.weight_of(&bt(&[1])), Some(u64::MAX));
    }

    #[test]
    fn test_rerecording_never_changes_size() {
        let mut log = BacktraceLog::new(3, 2);
        for key in [[1, 1], [2, 2], [3, 3]] {
            let slot = log.lookup_or_create_slot(&bt(&key));
            log.increment(slot, 1);
        }
        let mut previous = 1;
        for _ in 0..100 {
            let slot = log.lookup_or_create_slot(&bt(&[2, 2]));
            log.increment(slot, 3);
            let weight = log.weight_of(&bt(&[2, 2])).unwrap();
            assert!(weight >= previous);
            previous = weight;
            assert_eq!(log.len(), 3);
        }
        assert_eq!(log.evictions(), 0);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut log = BacktraceLog::new(7, 2);
        for i in 1..=500u64 {
            let slot = log.lookup_or_create_slot(&bt(&[i % 53 + 1, i % 11 + 1]));
            log.increment(slot, i % 5);
            assert!(log.len() <= 7);
        }
    }

    #[test]
    fn test_scratch_round_trip() {
        let mut log = BacktraceLog::new(2, 5);
        let scratch = log.take_scratch();
        assert_eq!(scratch.len(), 5);
        log.restore_scratch(scratch);
        assert_eq!(log.take_scratch().len(), 5);
    }

    #[test]
    fn test_debug_is_compact() {
        let log = BacktraceLog::new(10_000, 16);
        let rendered = format!("{log:?}");
        assert!(rendered.contains("capacity: 10000"));
        assert!(rendered.len() < 200);
    }
}
