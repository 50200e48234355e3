//! Profile export
//!
//! Turns exported [`Snapshot`](crate::sampler::Snapshot)s into something a
//! person or another tool can read: a JSON profile document, and a ranked
//! summary of the heaviest call stacks for terminal output.

pub mod json;
pub mod summary;

pub use json::{Frame, ProfileDocument, Sample, SnapshotExporter};
pub use summary::{heaviest, Hotspot};
