//! # Shared Types (Host ↔ Profiler)
//!
//! Defines the frame identifier and the constants shared between a host
//! interpreter that maintains call stacks and the `sprof` profiling core.
//! The crate is `no_std` so that a host can depend on it from code that must
//! not pull in the standard library (allocator shims, signal trampolines).
//!
//! ## Key Types
//!
//! - [`FrameId`] - Opaque identifier of one call-stack frame
//!
//! ## Reserved Values
//!
//! - [`FrameId::NULL`] pads backtraces shorter than the configured depth
//! - [`FrameId::GC`] keys the synthesized garbage-collection entry in CPU logs

#![no_std]

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Number of distinct backtraces a log can hold before eviction kicks in.
pub const DEFAULT_LOG_CAPACITY: usize = 10_000;

/// Number of frames recorded per backtrace.
///
/// Deeper stacks are truncated to their newest `DEFAULT_MAX_STACK_DEPTH`
/// frames; shallower stacks are padded with [`FrameId::NULL`].
pub const DEFAULT_MAX_STACK_DEPTH: usize = 16;

/// Default CPU sampling interval in milliseconds.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 10;

// ============================================================================
// Frame Identifier
// ============================================================================

/// Identifier of a single call-stack frame.
///
/// The profiler never interprets the value beyond equality and hashing; a
/// host may use function pointers, interned symbol indices or bytecode
/// addresses. Two values are reserved, see [`FrameId::NULL`] and
/// [`FrameId::GC`].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameId(pub u64);

impl FrameId {
    /// Padding sentinel for unused backtrace slots.
    pub const NULL: FrameId = FrameId(0);

    /// Marker frame of the entry that accumulates time spent reclaiming memory.
    pub const GC: FrameId = FrameId(u64::MAX);

    /// Create a frame identifier from a raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns `true` for the padding sentinel.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL.0
    }

    /// Returns `true` for either reserved value.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 == Self::NULL.0 || self.0 == Self::GC.0
    }

    /// Raw value of the identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for FrameId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
