//! Host interpreter collaborators
//!
//! The profiler does not know how the host represents its call stack or when
//! its garbage collector runs. It asks through [`StackSource`], which the
//! host implements over whatever structure it already maintains.
//! [`ShadowStack`] is a ready-made implementation for hosts that do not
//! already keep one.

pub mod shadow_stack;

pub use shadow_stack::{FrameGuard, ReclaimGuard, ShadowStack};

use crate::domain::FrameId;

/// Provider of the live call stack.
///
/// Both methods are called from the CPU sampler's signal handler, which may
/// have interrupted the host anywhere, including halfway through a push onto
/// its own call stack or in the middle of a garbage collection. Implementations
/// must not allocate, must not take locks, and must tolerate reading a stack
/// that is being modified.
pub trait StackSource: Send + Sync {
    /// Write the live frames into `out`, newest first.
    ///
    /// Writes at most `out.len()` frames and returns how many were written.
    /// Frames beyond the returned count are padded by the caller. The
    /// reserved ids [`FrameId::NULL`] and [`FrameId::GC`] must never be
    /// written: they would collide with padding and the GC entry.
    fn capture(&self, out: &mut [FrameId]) -> usize;

    /// Whether the host is reclaiming memory right now.
    ///
    /// While this is `true`, CPU ticks are accounted to the garbage
    /// collection entry instead of being recorded. A host without a cheap,
    /// interrupt-safe signal keeps the default and loses that attribution.
    fn is_reclaiming(&self) -> bool {
        false
    }
}
