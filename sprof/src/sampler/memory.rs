//! Allocation-probe driven memory sampler
//!
//! The host's allocator reports allocations to [`MemorySampler::probe`]
//! (every allocation, or only some of them); each report attributes its byte
//! count to the live call stack. [`AllocationGate`] turns a stream of every
//! allocation into byte-interval samples for hosts that cannot pre-filter.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{SamplerCore, Snapshot};
use crate::config::LogSettings;
use crate::domain::{SamplerError, SamplerKind, SamplerState};
use crate::host::StackSource;

/// Byte-interval allocation sampler.
///
/// Accumulates allocation sizes and lets one report through each time the
/// running total reaches the interval; the report carries every byte
/// accumulated since the previous one. An interval of 0 lets every
/// allocation through unchanged.
#[derive(Debug)]
pub struct AllocationGate {
    interval: u64,
    pending: AtomicU64,
}

impl AllocationGate {
    #[must_use]
    pub fn new(interval_bytes: u64) -> Self {
        Self { interval: interval_bytes, pending: AtomicU64::new(0) }
    }

    /// Account for an allocation of `size` bytes.
    ///
    /// Returns the byte count to report, if this allocation crossed the
    /// interval.
    pub fn note(&self, size: u64) -> Option<u64> {
        if self.interval == 0 {
            return Some(size);
        }

        let previous = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| Some(p.saturating_add(size)))
            .unwrap_or_else(|p| p);
        if previous.saturating_add(size) < self.interval {
            return None;
        }

        // Another thread may have claimed the total in between
        match self.pending.swap(0, Ordering::AcqRel) {
            0 => None,
            bytes => Some(bytes),
        }
    }

    /// Bytes accumulated towards the next report
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }
}

/// Memory allocation sampler.
pub struct MemorySampler {
    core: SamplerCore,
    source: Arc<dyn StackSource>,
    gate: AllocationGate,
}

impl MemorySampler {
    #[must_use]
    pub fn new(settings: Arc<LogSettings>, source: Arc<dyn StackSource>, gate: AllocationGate) -> Self {
        Self { core: SamplerCore::new(SamplerKind::Memory, settings), source, gate }
    }

    /// Start recording probes, creating the log on first start.
    ///
    /// # Errors
    /// Returns [`SamplerError::AlreadyRunning`] if the sampler is running;
    /// its log is left untouched.
    pub fn start(&self) -> Result<(), SamplerError> {
        self.core.begin()?;
        info!("Memory profiler started");
        Ok(())
    }

    /// Stop recording. The log is kept. Returns whether the sampler was running.
    pub fn stop(&self) -> bool {
        let was_running = self.core.end();
        if was_running {
            info!("Memory profiler stopped");
        }
        was_running
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    #[must_use]
    pub fn state(&self) -> SamplerState {
        self.core.state()
    }

    /// Entries recorded in the live log so far
    #[must_use]
    pub fn live_len(&self) -> usize {
        self.core.live_len()
    }

    /// Attribute `size_bytes` to the live call stack.
    ///
    /// Called from the allocation path: does not allocate and never blocks.
    /// A no-op while stopped or when there is no live log.
    pub fn probe(&self, size_bytes: u64) {
        if !self.core.is_running() {
            return;
        }
        self.core.record(&*self.source, size_bytes);
    }

    /// Report an allocation through the [`AllocationGate`].
    pub fn note_allocation(&self, size_bytes: u64) {
        if !self.core.is_running() {
            return;
        }
        if let Some(bytes) = self.gate.note(size_bytes) {
            self.core.record(&*self.source, bytes);
        }
    }

    /// Hand over the current log; a fresh one is installed only while running.
    pub fn export(&self) -> Snapshot {
        let (log, dropped) = self.core.rotate();
        let snapshot =
            Snapshot::new(SamplerKind::Memory, log, self.core.settings().depth(), dropped);
        info!(
            "Exported memory log: {} entries, {} evictions, {dropped} dropped",
            snapshot.len(),
            snapshot.evictions()
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfilerConfig;
    use crate::domain::FrameId;
    use crate::host::ShadowStack;

    fn sampler(stack: &Arc<ShadowStack>, gate_bytes: u64) -> MemorySampler {
        let config = ProfilerConfig::default().with_log_capacity(8).with_max_stack_depth(3);
        MemorySampler::new(
            Arc::new(LogSettings::new(&config)),
            stack.clone(),
            AllocationGate::new(gate_bytes),
        )
    }

    #[test]
    fn test_probe_records_bytes() {
        let stack = Arc::new(ShadowStack::new(4));
        let memory = sampler(&stack, 0);
        memory.start().unwrap();

        let _alloc = stack.push(FrameId(7));
        memory.probe(128);
        memory.probe(64);

        let snapshot = memory.export();
        assert_eq!(snapshot.weight_of(&[FrameId(7)]), Some(192));
        assert_eq!(snapshot.gc_weight(), None);
        assert!(snapshot.entries().all(|(frames, _)| frames.len() == 3));
    }

    #[test]
    fn test_probe_while_stopped_is_noop() {
        let stack = Arc::new(ShadowStack::new(4));
        let memory = sampler(&stack, 0);
        let _alloc = stack.push(FrameId(7));

        memory.probe(128);
        memory.start().unwrap();
        memory.stop();
        memory.probe(128);

        assert!(memory.export().is_empty());
    }

    #[test]
    fn test_double_export_second_is_empty() {
        let stack = Arc::new(ShadowStack::new(4));
        let memory = sampler(&stack, 0);
        memory.start().unwrap();
        let _alloc = stack.push(FrameId(1));
        memory.probe(10);

        assert_eq!(memory.export().len(), 1);
        let second = memory.export();
        assert!(second.is_empty());
        assert!(second.log().is_some());
    }

    #[test]
    fn test_export_when_stopped_installs_nothing() {
        let stack = Arc::new(ShadowStack::new(4));
        let memory = sampler(&stack, 0);
        memory.start().unwrap();
        let _alloc = stack.push(FrameId(1));
        memory.probe(10);
        memory.stop();

        let first = memory.export();
        assert_eq!(first.weight_of(&[FrameId(1)]), Some(10));

        memory.probe(10);
        let second = memory.export();
        assert!(second.log().is_none());
        assert!(second.is_empty());
    }

    #[test]
    fn test_start_twice_fails() {
        let stack = Arc::new(ShadowStack::new(4));
        let memory = sampler(&stack, 0);
        memory.start().unwrap();
        assert!(matches!(
            memory.start(),
            Err(SamplerError::AlreadyRunning(SamplerKind::Memory))
        ));
        assert!(memory.is_running());
    }

    #[test]
    fn test_gate_reports_accumulated_bytes() {
        let gate = AllocationGate::new(100);
        assert_eq!(gate.note(40), None);
        assert_eq!(gate.note(40), None);
        assert_eq!(gate.note(40), Some(120));
        assert_eq!(gate.pending(), 0);
        assert_eq!(gate.note(100), Some(100));
    }

    #[test]
    fn test_gate_zero_interval_passes_everything() {
        let gate = AllocationGate::new(0);
        assert_eq!(gate.note(1), Some(1));
        assert_eq!(gate.note(0), Some(0));
    }

    #[test]
    fn test_note_allocation_uses_gate() {
        let stack = Arc::new(ShadowStack::new(4));
        let memory = sampler(&stack, 256);
        memory.start().unwrap();
        let _alloc = stack.push(FrameId(2));

        for _ in 0..5 {
            memory.note_allocation(100);
        }

        let snapshot = memory.export();
        // 300 reported at the third allocation, 200 still pending
        assert_eq!(snapshot.weight_of(&[FrameId(2)]), Some(300));
    }
}
