//! Exported profiler logs
//!
//! A [`Snapshot`] owns the log a sampler handed over on export. The sampler
//! no longer touches it, so it can be read, merged or serialized at leisure.

use std::collections::HashMap;

use crate::domain::{FrameId, SamplerKind};
use crate::histogram::BacktraceLog;

/// A log taken out of a sampler by `export`.
#[derive(Debug)]
pub struct Snapshot {
    kind: SamplerKind,
    depth: usize,
    log: Option<BacktraceLog>,
    /// Reserved GC key and its weight (CPU snapshots only)
    gc: Option<(Box<[FrameId]>, u64)>,
    dropped: u64,
}

impl Snapshot {
    pub(crate) fn new(
        kind: SamplerKind,
        log: Option<BacktraceLog>,
        fallback_depth: usize,
        dropped: u64,
    ) -> Self {
        let depth = log.as_ref().map_or(fallback_depth, BacktraceLog::depth);
        Self { kind, depth, log, gc: None, dropped }
    }

    /// Attach the time spent reclaiming memory under the reserved GC key.
    pub(crate) fn with_gc_weight(mut self, weight: u64) -> Self {
        let mut key = vec![FrameId::NULL; self.depth.max(1)];
        key[0] = FrameId::GC;
        self.gc = Some((key.into_boxed_slice(), weight));
        self
    }

    /// Sampler that produced this snapshot
    #[must_use]
    pub fn kind(&self) -> SamplerKind {
        self.kind
    }

    /// Length of every backtrace in this snapshot
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The exported log, if the sampler had one.
    #[must_use]
    pub fn log(&self) -> Option<&BacktraceLog> {
        self.log.as_ref()
    }

    /// Consume the snapshot, keeping only the log.
    #[must_use]
    pub fn into_log(self) -> Option<BacktraceLog> {
        self.log
    }

    /// Recorded backtraces and their weights, without the GC entry.
    pub fn backtraces(&self) -> impl Iterator<Item = (&[FrameId], u64)> + '_ {
        self.log.iter().flat_map(BacktraceLog::entries)
    }

    /// All entries: recorded backtraces followed by the GC entry, if any.
    pub fn entries(&self) -> impl Iterator<Item = (&[FrameId], u64)> + '_ {
        self.backtraces().chain(self.gc.iter().map(|(key, weight)| (&key[..], *weight)))
    }

    /// Number of entries, counting the GC entry
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.as_ref().map_or(0, BacktraceLog::len) + usize::from(self.gc.is_some())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Weight of `frames`, including the reserved GC key.
    #[must_use]
    pub fn weight_of(&self, frames: &[FrameId]) -> Option<u64> {
        if let Some((key, weight)) = &self.gc {
            let is_gc_key = key
                .iter()
                .enumerate()
                .all(|(i, f)| *f == frames.get(i).copied().unwrap_or(FrameId::NULL));
            if is_gc_key {
                return Some(*weight);
            }
        }
        self.log.as_ref()?.weight_of(frames)
    }

    /// Time accounted to garbage collection; `None` for memory snapshots.
    #[must_use]
    pub fn gc_weight(&self) -> Option<u64> {
        self.gc.as_ref().map(|(_, weight)| *weight)
    }

    /// Eviction rounds the exported log went through
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.log.as_ref().map_or(0, BacktraceLog::evictions)
    }

    /// Samples dropped because the log was busy when they arrived
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Sum of all entry weights, saturating.
    #[must_use]
    pub fn total_weight(&self) -> u64 {
        self.entries().fold(0u64, |acc, (_, w)| acc.saturating_add(w))
    }

    /// Copy the entries into an owned map.
    #[must_use]
    pub fn into_map(self) -> HashMap<Vec<FrameId>, u64> {
        self.entries().map(|(frames, weight)| (frames.to_vec(), weight)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(entries: &[(&[u64], u64)]) -> BacktraceLog {
        let mut log = BacktraceLog::new(8, 3);
        for (frames, weight) in entries {
            let key: Vec<FrameId> = frames.iter().copied().map(FrameId).collect();
            let slot = log.lookup_or_create_slot(&key);
            log.increment(slot, *weight);
        }
        log
    }

    #[test]
    fn test_gc_entry_has_full_depth() {
        let recorded: [(&[u64], u64); 1] = [(&[1], 10)];
        let snapshot =
            Snapshot::new(SamplerKind::Cpu, Some(log_with(&recorded)), 16, 0).with_gc_weight(30);

        let (key, weight) = snapshot.entries().last().unwrap();
        assert_eq!(key, &[FrameId::GC, FrameId::NULL, FrameId::NULL]);
        assert_eq!(weight, 30);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.weight_of(&[FrameId::GC]), Some(30));
        assert_eq!(snapshot.total_weight(), 40);
    }

    #[test]
    fn test_missing_log_uses_fallback_depth() {
        let snapshot = Snapshot::new(SamplerKind::Memory, None, 16, 0);
        assert_eq!(snapshot.depth(), 16);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.gc_weight(), None);
        assert_eq!(snapshot.evictions(), 0);
    }

    #[test]
    fn test_into_map() {
        let recorded: [(&[u64], u64); 2] = [(&[1, 2], 64), (&[3], 8)];
        let snapshot = Snapshot::new(SamplerKind::Memory, Some(log_with(&recorded)), 3, 2);
        assert_eq!(snapshot.dropped(), 2);

        let map = snapshot.into_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&vec![FrameId(1), FrameId(2), FrameId::NULL]], 64);
        assert_eq!(map[&vec![FrameId(3), FrameId::NULL, FrameId::NULL]], 8);
    }
}
