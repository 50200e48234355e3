//! Interval-timer driven CPU sampler
//!
//! Every tick attributes one sampling interval to the live call stack. While
//! the host is reclaiming memory the interval goes to a separate GC
//! accumulator instead: the host's stack and heap bookkeeping are not in a
//! state the recorder can rely on during a collection.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{SamplerCore, Snapshot};
use crate::config::LogSettings;
use crate::domain::{SamplerError, SamplerKind, SamplerState};
use crate::host::StackSource;
use crate::timer::Alarm;

/// CPU time sampler.
pub struct CpuSampler {
    core: SamplerCore,
    source: Arc<dyn StackSource>,
    alarm: Box<dyn Alarm>,
    interval_ms: AtomicU64,
    gc_weight: AtomicU64,
}

impl CpuSampler {
    #[must_use]
    pub fn new(
        settings: Arc<LogSettings>,
        source: Arc<dyn StackSource>,
        alarm: Box<dyn Alarm>,
    ) -> Self {
        Self {
            core: SamplerCore::new(SamplerKind::Cpu, settings),
            source,
            alarm,
            interval_ms: AtomicU64::new(0),
            gc_weight: AtomicU64::new(0),
        }
    }

    /// Start sampling every `interval_ms` milliseconds.
    ///
    /// Creates the log on first start; a log left over from an earlier run
    /// keeps accumulating.
    ///
    /// # Errors
    /// - [`SamplerError::InvalidInterval`] for a zero interval
    /// - [`SamplerError::AlreadyRunning`] if the sampler is running; its log
    ///   is left untouched
    /// - [`SamplerError::Timer`] if the alarm cannot be armed; the sampler
    ///   stays stopped
    pub fn start(&self, interval_ms: u64) -> Result<(), SamplerError> {
        if interval_ms == 0 {
            return Err(SamplerError::InvalidInterval);
        }

        if self.core.begin()? {
            self.gc_weight.store(0, Ordering::Release);
        }
        self.interval_ms.store(interval_ms, Ordering::Release);

        if let Err(e) = self.alarm.arm(Duration::from_millis(interval_ms)) {
            self.core.end();
            return Err(e);
        }

        info!("CPU profiler started, sampling every {interval_ms}ms");
        Ok(())
    }

    /// Stop sampling. The log is kept. Returns whether the sampler was running.
    pub fn stop(&self) -> bool {
        let was_running = self.core.end();
        if was_running {
            self.alarm.disarm();
            info!("CPU profiler stopped");
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

    /// Interval set by the last successful [`start`](Self::start), in ms
    #[must_use]
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Acquire)
    }

    /// Handle one timer tick.
    ///
    /// Runs in signal context: no allocation, no blocking. Ticks that arrive
    /// while the sampler is stopped, or while its log is being exported, are
    /// absorbed.
    pub fn tick(&self) {
        if !self.core.is_running() {
            return;
        }
        let interval = self.interval_ms.load(Ordering::Relaxed);

        if self.source.is_reclaiming() {
            // fetch_update only fails if the closure returns None
            let _ = self.gc_weight.fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                Some(w.saturating_add(interval))
            });
        } else {
            self.core.record(&*self.source, interval);
        }
    }

    /// Hand over the current log plus the GC entry, and reset GC time.
    ///
    /// A fresh log is installed only while running; after exporting a
    /// stopped sampler nothing is recorded until the next start.
    pub fn export(&self) -> Snapshot {
        let (log, dropped) = self.core.rotate();
        let gc_weight = self.gc_weight.swap(0, Ordering::AcqRel);

        let snapshot = Snapshot::new(SamplerKind::Cpu, log, self.core.settings().depth(), dropped)
            .with_gc_weight(gc_weight);
        info!(
            "Exported CPU log: {} entries, {gc_weight}ms in GC, {} evictions, {dropped} dropped",
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
    use crate::timer::ManualAlarm;

    /// Alarm that always fails to arm.
    struct BrokenAlarm;

    impl Alarm for BrokenAlarm {
        fn arm(&self, _interval: Duration) -> Result<(), SamplerError> {
            Err(std::io::Error::from_raw_os_error(libc::EINVAL).into())
        }

        fn disarm(&self) {}
    }

    fn sampler(stack: &Arc<ShadowStack>) -> CpuSampler {
        let config = ProfilerConfig::default().with_log_capacity(16).with_max_stack_depth(4);
        CpuSampler::new(
            Arc::new(LogSettings::new(&config)),
            stack.clone(),
            Box::new(ManualAlarm::new()),
        )
    }

    #[test]
    fn test_tick_records_interval() {
        let stack = Arc::new(ShadowStack::new(8));
        let cpu = sampler(&stack);
        cpu.start(10).unwrap();

        let _main = stack.push(FrameId(1));
        let _work = stack.push(FrameId(2));
        cpu.tick();
        cpu.tick();

        let snapshot = cpu.export();
        assert_eq!(snapshot.weight_of(&[FrameId(2), FrameId(1)]), Some(20));
        assert_eq!(snapshot.gc_weight(), Some(0));
    }

    #[test]
    fn test_ticks_during_reclaim_go_to_gc() {
        let stack = Arc::new(ShadowStack::new(8));
        let cpu = sampler(&stack);
        cpu.start(5).unwrap();

        let _main = stack.push(FrameId(1));
        {
            let _gc = stack.enter_reclaim();
            cpu.tick();
            cpu.tick();
            cpu.tick();
        }
        cpu.tick();

        let snapshot = cpu.export();
        assert_eq!(snapshot.gc_weight(), Some(15));
        assert_eq!(snapshot.weight_of(&[FrameId(1)]), Some(5));
        assert_eq!(snapshot.backtraces().count(), 1);

        // GC time was reset by the export
        assert_eq!(cpu.export().gc_weight(), Some(0));
    }

    #[test]
    fn test_start_twice_keeps_weights() {
        let stack = Arc::new(ShadowStack::new(8));
        let cpu = sampler(&stack);
        cpu.start(10).unwrap();
        let _main = stack.push(FrameId(1));
        cpu.tick();

        let err = cpu.start(1).unwrap_err();
        assert!(matches!(err, SamplerError::AlreadyRunning(SamplerKind::Cpu)));
        assert_eq!(cpu.interval_ms(), 10);

        cpu.tick();
        assert_eq!(cpu.export().weight_of(&[FrameId(1)]), Some(20));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let stack = Arc::new(ShadowStack::new(1));
        let cpu = sampler(&stack);
        assert!(matches!(cpu.start(0), Err(SamplerError::InvalidInterval)));
        assert!(!cpu.is_running());
    }

    #[test]
    fn test_stop_reports_previous_state() {
        let stack = Arc::new(ShadowStack::new(1));
        let cpu = sampler(&stack);
        assert!(!cpu.stop());
        cpu.start(10).unwrap();
        assert_eq!(cpu.state(), SamplerState::Running);
        assert!(cpu.stop());
        assert!(!cpu.stop());
        assert_eq!(cpu.state(), SamplerState::Stopped);
    }

    #[test]
    fn test_ticks_after_stop_are_ignored() {
        let stack = Arc::new(ShadowStack::new(4));
        let cpu = sampler(&stack);
        cpu.start(10).unwrap();
        let _main = stack.push(FrameId(1));
        cpu.tick();
        cpu.stop();
        cpu.tick();

        assert_eq!(cpu.export().weight_of(&[FrameId(1)]), Some(10));
    }

    #[test]
    fn test_failed_arm_leaves_sampler_stopped() {
        let stack = Arc::new(ShadowStack::new(1));
        let cpu = CpuSampler::new(Arc::new(LogSettings::default()), stack, Box::new(BrokenAlarm));

        assert!(matches!(cpu.start(10), Err(SamplerError::Timer(_))));
        assert!(!cpu.is_running());
    }

    #[test]
    fn test_log_accumulates_across_restart() {
        let stack = Arc::new(ShadowStack::new(4));
        let cpu = sampler(&stack);
        let _main = stack.push(FrameId(3));

        cpu.start(10).unwrap();
        cpu.tick();
        cpu.stop();
        cpu.start(20).unwrap();
        cpu.tick();

        assert_eq!(cpu.export().weight_of(&[FrameId(3)]), Some(30));
    }
}
