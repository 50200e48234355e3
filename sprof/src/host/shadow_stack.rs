//! Lock-free shadow call stack
//!
//! A host interpreter pushes a [`FrameId`] when it enters a function and pops
//! it when it returns; the CPU sampler reads the stack from a signal handler
//! that may have interrupted either operation. Storage is fixed at
//! construction and every access is a single atomic load or store, so
//! reading never allocates and never blocks.
//!
//! The stack is meant to be written by one interpreter thread. Frames pushed
//! beyond the fixed capacity still count towards the depth but are not
//! stored. While any frame is missing a capture reports no frames at all,
//! so deep recursion is recorded under the empty backtrace instead of being
//! credited to outer frames.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::StackSource;
use crate::domain::FrameId;

/// Fixed-capacity call stack readable from interrupt context.
#[derive(Debug)]
pub struct ShadowStack {
    frames: Box<[AtomicU64]>,
    depth: AtomicUsize,
    reclaiming: AtomicUsize,
}

impl ShadowStack {
    /// Create a stack able to store `capacity` frames.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: (0..capacity).map(|_| AtomicU64::new(FrameId::NULL.0)).collect(),
            depth: AtomicUsize::new(0),
            reclaiming: AtomicUsize::new(0),
        }
    }

    /// Enter `frame`; it is popped when the returned guard drops.
    ///
    /// `frame` must not be one of the reserved ids ([`FrameId::NULL`],
    /// [`FrameId::GC`]).
    pub fn push(&self, frame: FrameId) -> FrameGuard<'_> {
        debug_assert!(!frame.is_reserved(), "reserved frame id pushed: {frame:?}");
        let depth = self.depth.load(Ordering::Relaxed);
        if let Some(slot) = self.frames.get(depth) {
            slot.store(frame.0, Ordering::Relaxed);
        }
        // Publish the frame before the new depth
        self.depth.store(depth + 1, Ordering::Release);
        FrameGuard { stack: self }
    }

    /// Mark the host as reclaiming memory until the returned guard drops.
    ///
    /// Guards nest; the host counts as reclaiming while any is alive.
    pub fn enter_reclaim(&self) -> ReclaimGuard<'_> {
        self.reclaiming.fetch_add(1, Ordering::AcqRel);
        ReclaimGuard { stack: self }
    }

    /// Current logical depth, including frames beyond capacity.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn pop(&self) {
        let depth = self.depth.load(Ordering::Relaxed);
        self.depth.store(depth.saturating_sub(1), Ordering::Release);
    }
}

impl StackSource for ShadowStack {
    fn capture(&self, out: &mut [FrameId]) -> usize {
        let depth = self.depth.load(Ordering::Acquire);
        if depth > self.frames.len() {
            return 0;
        }
        let count = depth.min(out.len());
        for (dst, src) in out.iter_mut().zip(self.frames[..depth].iter().rev()).take(count) {
            *dst = FrameId(src.load(Ordering::Relaxed));
        }
        count
    }

    fn is_reclaiming(&self) -> bool {
        self.reclaiming.load(Ordering::Acquire) > 0
    }
}

/// Pops its frame from the [`ShadowStack`] on drop.
#[must_use = "the frame is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FrameGuard<'a> {
    stack: &'a ShadowStack,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.stack.pop();
    }
}

/// Ends a reclamation phase on drop.
#[must_use = "reclamation ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReclaimGuard<'a> {
    stack: &'a ShadowStack,
}

impl Drop for ReclaimGuard<'_> {
    fn drop(&mut self) {
        self.stack.reclaiming.fetch_sub(1, Ordering::AcqRel);
    }
}
