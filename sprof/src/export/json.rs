use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::io::Write;

use crate::domain::{ExportError, FrameId, SamplerKind};
use crate::histogram::BacktraceLog;
use crate::sampler::Snapshot;

/// Name written for the reserved garbage collection frame
pub const GC_FRAME_NAME: &str = "[gc]";

/// One frame of an exported backtrace.
///
/// Frames with a registered name are written as that name, others as their
/// raw id. Padding frames are written as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Id(u64),
    Name(String),
}

/// A backtrace and its accumulated weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Newest frame first, always `max_stack_depth` long
    pub frames: Vec<Option<Frame>>,
    /// Milliseconds for CPU profiles, bytes for memory profiles
    pub weight: u64,
}

/// Serialized form of one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDocument {
    pub kind: SamplerKind,
    pub max_stack_depth: usize,
    pub log_capacity: usize,
    pub evictions: u64,
    pub dropped_samples: u64,
    pub total_weight: u64,
    /// Heaviest first
    pub samples: Vec<Sample>,
}

/// JSON exporter for profiler snapshots
#[derive(Debug, Default)]
pub struct SnapshotExporter {
    /// Optional human-readable names for frame ids
    names: HashMap<FrameId, String>,
}

impl SnapshotExporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an exporter that writes the given names instead of raw ids
    #[must_use]
    pub fn with_names(names: HashMap<FrameId, String>) -> Self {
        Self { names }
    }

    /// Register a name for a frame id
    pub fn set_name(&mut self, frame: FrameId, name: impl Into<String>) {
        self.names.insert(frame, name.into());
    }

    fn frame(&self, frame: FrameId) -> Option<Frame> {
        if frame.is_null() {
            return None;
        }
        if frame == FrameId::GC {
            return Some(Frame::Name(GC_FRAME_NAME.to_string()));
        }
        Some(match self.names.get(&frame) {
            Some(name) => Frame::Name(name.clone()),
            None => Frame::Id(frame.get()),
        })
    }

    /// Build the document for a snapshot
    #[must_use]
    pub fn document(&self, snapshot: &Snapshot) -> ProfileDocument {
        let mut samples: Vec<Sample> = snapshot
            .entries()
            .map(|(frames, weight)| Sample {
                frames: frames.iter().map(|&f| self.frame(f)).collect(),
                weight,
            })
            .collect();
        // Stable output: heaviest first, ties in log order
        samples.sort_by_key(|sample| Reverse(sample.weight));

        ProfileDocument {
            kind: snapshot.kind(),
            max_stack_depth: snapshot.depth(),
            log_capacity: snapshot.log().map_or(0, BacktraceLog::capacity),
            evictions: snapshot.evictions(),
            dropped_samples: snapshot.dropped(),
            total_weight: snapshot.total_weight(),
            samples,
        }
    }

    /// Write one snapshot as a pretty-printed JSON document
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn export<W: Write>(&self, snapshot: &Snapshot, mut writer: W) -> Result<(), ExportError> {
        serde_json::to_writer_pretty(&mut writer, &self.document(snapshot))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Write several snapshots as a JSON array of documents
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn export_all<W: Write>(
        &self,
        snapshots: &[Snapshot],
        mut writer: W,
    ) -> Result<(), ExportError> {
        let documents: Vec<ProfileDocument> = snapshots.iter().map(|s| self.document(s)).collect();
        serde_json::to_writer_pretty(&mut writer, &documents)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}
