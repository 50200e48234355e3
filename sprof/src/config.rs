//! Profiler configuration
//!
//! [`ProfilerConfig`] is the user-facing, deserializable configuration.
//! [`LogSettings`] is its live counterpart shared by both samplers: the values
//! are read only when a log is created, so a change applies to the next log
//! and never resizes one that is already recording.

use log::debug;
use serde::Deserialize;
use sprof_common::{DEFAULT_LOG_CAPACITY, DEFAULT_MAX_STACK_DEPTH};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::ConfigError;
use crate::histogram::BacktraceLog;

/// Controls the shape of profiler logs and allocation sampling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Number of distinct call stacks a log can hold before eviction.
    pub log_capacity: usize,
    /// Number of frames recorded per call stack.
    pub max_stack_depth: usize,
    /// Emit one memory probe per this many allocated bytes (0 = every allocation).
    pub alloc_sample_bytes: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            alloc_sample_bytes: 0,
        }
    }
}

impl ProfilerConfig {
    /// Builder-style helper to adjust the log capacity.
    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Builder-style helper to adjust the maximum stack depth.
    #[must_use]
    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.max_stack_depth = depth;
        self
    }

    /// Builder-style helper to adjust byte-interval allocation sampling.
    #[must_use]
    pub fn with_alloc_sample_bytes(mut self, bytes: u64) -> Self {
        self.alloc_sample_bytes = bytes;
        self
    }

    /// Check that the configuration describes a usable log.
    ///
    /// # Errors
    /// Returns an error for a zero capacity or depth, or a capacity that
    /// does not fit the log's 32-bit row handles.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.max_stack_depth == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        if u32::try_from(self.log_capacity).is_err() {
            return Err(ConfigError::CapacityTooLarge(self.log_capacity));
        }
        Ok(())
    }
}

/// Live log dimensions, consulted each time a sampler creates a log.
#[derive(Debug)]
pub struct LogSettings {
    capacity: AtomicUsize,
    depth: AtomicUsize,
}

impl LogSettings {
    #[must_use]
    pub fn new(config: &ProfilerConfig) -> Self {
        Self {
            capacity: AtomicUsize::new(config.log_capacity),
            depth: AtomicUsize::new(config.max_stack_depth),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Set the capacity of logs created from now on.
    ///
    /// # Errors
    /// Returns an error if the capacity is zero or too large.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), ConfigError> {
        ProfilerConfig::default().with_log_capacity(capacity).validate()?;
        self.capacity.store(capacity, Ordering::Relaxed);
        Ok(())
    }

    /// Set the stack depth of logs created from now on.
    ///
    /// # Errors
    /// Returns an error if the depth is zero.
    pub fn set_depth(&self, depth: usize) -> Result<(), ConfigError> {
        ProfilerConfig::default().with_max_stack_depth(depth).validate()?;
        self.depth.store(depth, Ordering::Relaxed);
        Ok(())
    }

    /// Allocate a fresh, empty log with the current dimensions.
    ///
    /// Never call this from a tick or probe: it allocates the whole arena.
    #[must_use]
    pub fn new_log(&self) -> BacktraceLog {
        let (capacity, depth) = (self.capacity(), self.depth());
        debug!("Allocating backtrace log: capacity={capacity}, depth={depth}");
        BacktraceLog::new(capacity, depth)
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self::new(&ProfilerConfig::default())
    }
}
