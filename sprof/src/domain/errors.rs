//! Structured error types for sprof
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::SamplerKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("{0} profiler is already running")]
    AlreadyRunning(SamplerKind),

    #[error("Sampling interval must be at least 1ms")]
    InvalidInterval,

    #[error("Failed to arm profiling timer: {0}")]
    Timer(#[from] std::io::Error),

    #[error("Profiling timer is already bound to a different tick hook")]
    TimerHookTaken,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("log_capacity must be greater than zero")]
    ZeroCapacity,

    #[error("max_stack_depth must be greater than zero")]
    ZeroDepth,

    #[error("log_capacity {0} exceeds the supported maximum of {max}", max = u32::MAX)]
    CapacityTooLarge(usize),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
