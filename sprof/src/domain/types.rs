//! Core domain types with newtype pattern for type safety

use serde::{Deserialize, Serialize};
use std::fmt;

pub use sprof_common::FrameId;

/// Which sampler produced a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Interval-timer driven CPU time sampling
    Cpu,
    /// Allocation-probe driven memory sampling
    Memory,
}

impl fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerKind::Cpu => write!(f, "cpu"),
            SamplerKind::Memory => write!(f, "memory"),
        }
    }
}

/// Row index of an entry inside a [`BacktraceLog`](crate::histogram::BacktraceLog)
///
/// Only meaningful for the log that handed it out, and only until the next
/// insertion (which may evict the row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

impl SlotId {
    /// Index into per-row arrays
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle state of a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Stopped,
    Running,
}

impl SamplerState {
    #[must_use]
    pub fn from_running(running: bool) -> Self {
        if running {
            SamplerState::Running
        } else {
            SamplerState::Stopped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_kind_display() {
        assert_eq!(SamplerKind::Cpu.to_string(), "cpu");
        assert_eq!(SamplerKind::Memory.to_string(), "memory");
    }

    #[test]
    fn test_sampler_state_from_flag() {
        assert_eq!(SamplerState::from_running(true), SamplerState::Running);
        assert_eq!(SamplerState::from_running(false), SamplerState::Stopped);
    }
}
