//! CPU and memory samplers
//!
//! Both samplers are built on [`SamplerCore`], which owns the running flag
//! and the active log of one sampler kind and implements the rotation
//! protocol behind `export`.
//!
//! ## Concurrency
//!
//! The active log sits behind a `Mutex`, but the recording paths (a CPU
//! tick running in a signal handler, a memory probe running inside the
//! host's allocator) only ever `try_lock` it. If the lock is held, by an
//! export on another thread or by code the signal interrupted on this one,
//! the sample is dropped and counted instead of waiting:
//!
//! ```text
//!   tick / probe ── try_lock ──┬── acquired ──► record_backtrace
//!                              └── busy ──────► dropped += 1
//!
//!   start / export ── allocate log ── lock ──► install or swap it
//! ```
//!
//! `start`, `stop` and `export` never run in signal context, so the handler
//! can never be the party that waits.

pub mod cpu;
pub mod memory;
pub mod snapshot;

pub use cpu::CpuSampler;
pub use memory::{AllocationGate, MemorySampler};
pub use snapshot::Snapshot;

use log::debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use crate::config::LogSettings;
use crate::domain::{SamplerError, SamplerKind, SamplerState};
use crate::histogram::BacktraceLog;
use crate::host::StackSource;
use crate::recorder::record_backtrace;

/// State shared by both sampler kinds.
#[derive(Debug)]
pub(crate) struct SamplerCore {
    kind: SamplerKind,
    running: AtomicBool,
    active: Mutex<Option<BacktraceLog>>,
    settings: Arc<LogSettings>,
    dropped: AtomicU64,
}

impl SamplerCore {
    pub(crate) fn new(kind: SamplerKind, settings: Arc<LogSettings>) -> Self {
        Self {
            kind,
            running: AtomicBool::new(false),
            active: Mutex::new(None),
            settings,
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn settings(&self) -> &LogSettings {
        &self.settings
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> SamplerState {
        SamplerState::from_running(self.is_running())
    }

    /// Transition to Running, creating the log if there is none.
    ///
    /// Returns whether a new log was created.
    pub(crate) fn begin(&self) -> Result<bool, SamplerError> {
        if self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err()
        {
            return Err(SamplerError::AlreadyRunning(self.kind));
        }

        // Logs are allocated outside the lock: an allocation probe taken
        // meanwhile must find it free.
        if self.lock().is_some() {
            return Ok(false);
        }
        let fresh = self.settings.new_log();
        let mut active = self.lock();
        if active.is_some() {
            // an export installed one in between
            return Ok(false);
        }
        *active = Some(fresh);
        Ok(true)
    }

    /// Transition to Stopped; returns whether the sampler was running.
    pub(crate) fn end(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    /// Record the live stack with `weight`. Safe to call from a signal handler.
    pub(crate) fn record(&self, source: &dyn StackSource, weight: u64) {
        let mut active = match self.active.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if let Some(log) = active.as_mut() {
            record_backtrace(log, source, weight);
        }
    }

    /// Take the active log, installing a fresh one only while running.
    ///
    /// Also returns the number of samples dropped since the last rotation.
    pub(crate) fn rotate(&self) -> (Option<BacktraceLog>, u64) {
        let mut prepared = self.is_running().then(|| self.settings.new_log());
        let mut active = self.lock();
        let installed = if self.is_running() {
            // started between the check and the lock
            prepared.take().or_else(|| Some(self.settings.new_log()))
        } else {
            None
        };
        let fresh = installed.is_some();
        let previous = std::mem::replace(&mut *active, installed);
        drop(active);
        drop(prepared);
        debug!("Rotated {} log, fresh log installed: {fresh}", self.kind);

        (previous, self.dropped.swap(0, Ordering::AcqRel))
    }

    /// Number of entries in the active log. Not for signal context.
    pub(crate) fn live_len(&self) -> usize {
        self.with_active(|log| log.map_or(0, BacktraceLog::len))
    }

    /// Run `f` against the active log, if any. Not for signal context.
    pub(crate) fn with_active<R>(&self, f: impl FnOnce(Option<&BacktraceLog>) -> R) -> R {
        let active = self.lock();
        f(active.as_ref())
    }

    fn lock(&self) -> MutexGuard<'_, Option<BacktraceLog>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FrameId;

    struct OneFrame;

    impl StackSource for OneFrame {
        fn capture(&self, out: &mut [FrameId]) -> usize {
            out[0] = FrameId(1);
            1
        }
    }

    fn core() -> SamplerCore {
        SamplerCore::new(SamplerKind::Memory, Arc::new(LogSettings::default()))
    }

    #[test]
    fn test_begin_twice_fails() {
        let core = core();
        assert!(core.begin().unwrap());
        assert!(matches!(
            core.begin(),
            Err(SamplerError::AlreadyRunning(SamplerKind::Memory))
        ));
        assert_eq!(core.state(), SamplerState::Running);
    }

    #[test]
    fn test_log_survives_restart() {
        let core = core();
        core.begin().unwrap();
        core.record(&OneFrame, 5);
        assert!(core.end());
        assert!(!core.end());

        assert!(!core.begin().unwrap());
        core.record(&OneFrame, 5);
        let total = core.with_active(|log| log.map(|l| l.weight_of(&[FrameId(1)])));
        assert_eq!(total, Some(Some(10)));
    }

    #[test]
    fn test_record_while_locked_is_dropped() {
        let core = core();
        core.begin().unwrap();

        core.with_active(|_| core.record(&OneFrame, 1));

        let (log, dropped) = core.rotate();
        assert_eq!(dropped, 1);
        assert!(log.unwrap().is_empty());
    }

    #[test]
    fn test_rotate_while_running_installs_fresh_log() {
        let core = core();
        core.begin().unwrap();
        core.record(&OneFrame, 3);

        let (log, dropped) = core.rotate();
        assert_eq!(dropped, 0);
        assert_eq!(log.unwrap().weight_of(&[FrameId(1)]), Some(3));
        core.record(&OneFrame, 4);
        let live = core.with_active(|log| log.map(|l| l.weight_of(&[FrameId(1)])));
        assert_eq!(live, Some(Some(4)));
    }

    #[test]
    fn test_rotate_when_stopped_leaves_no_log() {
        let core = core();
        core.begin().unwrap();
        core.end();

        let (log, _) = core.rotate();
        assert!(log.is_some());
        core.record(&OneFrame, 1);
        core.with_active(|log| assert!(log.is_none()));
    }
}
