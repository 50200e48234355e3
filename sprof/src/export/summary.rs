//! Heaviest call stacks of a snapshot, for terminal reports

use std::cmp::Reverse;

use crate::domain::FrameId;
use crate::sampler::Snapshot;

/// A call stack and its share of the snapshot's total weight
#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    /// Newest frame first, padding stripped
    pub frames: Vec<FrameId>,
    pub weight: u64,
    /// Percentage of the snapshot's total weight
    pub share: f64,
}

/// The `n` heaviest entries of `snapshot`, heaviest first.
///
/// Entries with zero weight (such as an idle GC entry) are skipped.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn heaviest(snapshot: &Snapshot, n: usize) -> Vec<Hotspot> {
    let total = snapshot.total_weight();
    let mut entries: Vec<(&[FrameId], u64)> =
        snapshot.entries().filter(|&(_, weight)| weight > 0).collect();
    entries.sort_by_key(|&(_, weight)| Reverse(weight));

    entries
        .into_iter()
        .take(n)
        .map(|(frames, weight)| Hotspot {
            frames: frames.iter().copied().take_while(|f| !f.is_null()).collect(),
            weight,
            share: if total == 0 { 0.0 } else { weight as f64 * 100.0 / total as f64 },
        })
        .collect()
}
