//! Periodic alarms that drive the CPU sampler
//!
//! The sampler only asks for a periodic tick to be armed or disarmed; how the
//! tick reaches [`CpuSampler::tick`](crate::sampler::CpuSampler::tick) is up
//! to the alarm:
//!
//! - [`ItimerAlarm`]: `setitimer(ITIMER_PROF)` delivering `SIGPROF`, whose
//!   handler calls a registered `fn()` hook. The interval counts process CPU
//!   time, so idle time is not sampled.
//! - [`ManualAlarm`]: records the requested interval and leaves ticking to
//!   the host (an event loop, a test).

// sigaction/setitimer and errno access require unsafe
#![allow(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::domain::SamplerError;

/// A periodic tick source.
pub trait Alarm: Send + Sync {
    /// Start delivering ticks every `interval`.
    ///
    /// # Errors
    /// Returns an error if the underlying timer cannot be armed.
    fn arm(&self, interval: Duration) -> Result<(), SamplerError>;

    /// Stop delivering ticks. A tick already being delivered may still run.
    fn disarm(&self);
}

/// Alarm whose ticks are delivered by the host.
///
/// Remembers the armed interval so the host (or a test) can pace its own
/// calls to [`CpuSampler::tick`](crate::sampler::CpuSampler::tick).
#[derive(Debug, Default)]
pub struct ManualAlarm {
    interval_us: AtomicU64,
}

impl ManualAlarm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interval requested by the last `arm`, or `None` while disarmed.
    #[must_use]
    pub fn armed_interval(&self) -> Option<Duration> {
        match self.interval_us.load(Ordering::Acquire) {
            0 => None,
            us => Some(Duration::from_micros(us)),
        }
    }
}

impl Alarm for ManualAlarm {
    fn arm(&self, interval: Duration) -> Result<(), SamplerError> {
        let us = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX).max(1);
        self.interval_us.store(us, Ordering::Release);
        Ok(())
    }

    fn disarm(&self) {
        self.interval_us.store(0, Ordering::Release);
    }
}

#[cfg(unix)]
pub use itimer::ItimerAlarm;

#[cfg(unix)]
mod itimer {
    use std::io;
    use std::sync::OnceLock;
    use std::time::Duration;

    use log::{debug, warn};

    use super::Alarm;
    use crate::domain::SamplerError;

    /// Hook run from the `SIGPROF` handler. Set once per process.
    static TICK_HOOK: OnceLock<fn()> = OnceLock::new();

    extern "C" fn on_sigprof(_signal: libc::c_int) {
        let saved = errno();
        if let Some(hook) = TICK_HOOK.get() {
            hook();
        }
        set_errno(saved);
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn errno_location() -> *mut libc::c_int {
        // SAFETY: returns the calling thread's errno slot; always valid
        unsafe { libc::__errno_location() }
    }

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    fn errno_location() -> *mut libc::c_int {
        // SAFETY: returns the calling thread's errno slot; always valid
        unsafe { libc::__error() }
    }

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    ))]
    fn errno() -> libc::c_int {
        // SAFETY: thread-local errno slot
        unsafe { *errno_location() }
    }

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    ))]
    fn set_errno(value: libc::c_int) {
        // SAFETY: thread-local errno slot
        unsafe { *errno_location() = value }
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    )))]
    fn errno() -> libc::c_int {
        0
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd"
    )))]
    fn set_errno(_value: libc::c_int) {}

    /// `ITIMER_PROF` / `SIGPROF` alarm.
    ///
    /// The `SIGPROF` handler stays installed after [`disarm`](Alarm::disarm)
    /// so that a signal still in flight is absorbed rather than terminating
    /// the process (the default action).
    #[derive(Debug)]
    pub struct ItimerAlarm {
        _private: (),
    }

    impl ItimerAlarm {
        /// Bind the process-wide `SIGPROF` handler to `on_tick`.
        ///
        /// `on_tick` runs in signal context: it must not allocate or block.
        /// Typically it forwards to a `static` profiler's
        /// [`CpuSampler::tick`](crate::sampler::CpuSampler::tick).
        ///
        /// # Errors
        /// Returns [`SamplerError::TimerHookTaken`] if a different hook was
        /// installed earlier in this process.
        pub fn install(on_tick: fn()) -> Result<Self, SamplerError> {
            let hook = *TICK_HOOK.get_or_init(|| on_tick);
            if !std::ptr::fn_addr_eq(hook, on_tick) {
                return Err(SamplerError::TimerHookTaken);
            }
            Ok(Self { _private: () })
        }

        fn install_handler() -> io::Result<()> {
            // SAFETY: zeroed sigaction is a valid "no flags, empty mask" value;
            // the handler is an extern "C" fn with the expected signature
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = on_sigprof as extern "C" fn(libc::c_int) as usize;
                action.sa_flags = libc::SA_RESTART;
                libc::sigemptyset(&raw mut action.sa_mask);
                if libc::sigaction(libc::SIGPROF, &raw const action, std::ptr::null_mut()) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        }

        fn set_timer(interval: Duration) -> io::Result<()> {
            // sub-second micros are below one million on every platform
            let micros = i32::try_from(interval.subsec_micros()).unwrap_or(0);
            let period = libc::timeval {
                tv_sec: libc::time_t::try_from(interval.as_secs()).unwrap_or(libc::time_t::MAX),
                tv_usec: libc::suseconds_t::from(micros),
            };
            let timer = libc::itimerval { it_interval: period, it_value: period };
            // SAFETY: timer is a fully initialised itimerval
            let rc =
                unsafe { libc::setitimer(libc::ITIMER_PROF, &raw const timer, std::ptr::null_mut()) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    impl Alarm for ItimerAlarm {
        fn arm(&self, interval: Duration) -> Result<(), SamplerError> {
            Self::install_handler()?;
            Self::set_timer(interval)?;
            debug!("SIGPROF timer armed every {}us", interval.as_micros());
            Ok(())
        }

        fn disarm(&self) {
            if let Err(e) = Self::set_timer(Duration::ZERO) {
                warn!("Failed to disarm SIGPROF timer: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_alarm_tracks_interval() {
        let alarm = ManualAlarm::new();
        assert_eq!(alarm.armed_interval(), None);

        alarm.arm(Duration::from_millis(10)).unwrap();
        assert_eq!(alarm.armed_interval(), Some(Duration::from_millis(10)));

        alarm.disarm();
        assert_eq!(alarm.armed_interval(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_itimer_hook_is_exclusive() {
        fn first() {
            std::hint::black_box(1);
        }
        fn second() {
            std::hint::black_box(2);
        }

        assert!(ItimerAlarm::install(first).is_ok());
        assert!(ItimerAlarm::install(first).is_ok());
        assert!(matches!(ItimerAlarm::install(second), Err(SamplerError::TimerHookTaken)));
    }
}
