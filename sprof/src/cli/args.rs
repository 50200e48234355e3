//! CLI argument definitions

use clap::{Parser, ValueEnum};
use sprof_common::{DEFAULT_LOG_CAPACITY, DEFAULT_MAX_STACK_DEPTH, DEFAULT_SAMPLE_INTERVAL_MS};
use std::path::PathBuf;

use crate::config::ProfilerConfig;
use crate::domain::SamplerKind;

/// Which samplers to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Cpu,
    Memory,
    Both,
}

impl Mode {
    /// Sampler kinds enabled by this mode
    #[must_use]
    pub fn kinds(self) -> &'static [SamplerKind] {
        match self {
            Mode::Cpu => &[SamplerKind::Cpu],
            Mode::Memory => &[SamplerKind::Memory],
            Mode::Both => &[SamplerKind::Cpu, SamplerKind::Memory],
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "sprof",
    about = "Sample CPU time and allocations of a small interpreted workload",
    after_help = "\
EXAMPLES:
    sprof                                   CPU profile until Ctrl+C
    sprof --mode both --duration 5          Both profilers for five seconds
    sprof --export profile.json --top 20    Save the profile, print 20 hotspots"
)]
pub struct Args {
    /// Samplers to run
    #[arg(long, value_enum, default_value = "cpu")]
    pub mode: Mode,

    /// CPU sampling interval in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_SAMPLE_INTERVAL_MS, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Stop after N seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Distinct call stacks each log can hold before evicting
    #[arg(long, default_value_t = DEFAULT_LOG_CAPACITY)]
    pub log_capacity: usize,

    /// Frames recorded per call stack
    #[arg(long, default_value_t = DEFAULT_MAX_STACK_DEPTH)]
    pub max_stack_depth: usize,

    /// Record one memory sample per this many allocated bytes (0 = every allocation)
    #[arg(long, default_value = "0")]
    pub alloc_sample_bytes: u64,

    /// Write the exported profiles to a JSON file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Number of heaviest call stacks to print
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Profiler configuration described by the flags
    #[must_use]
    pub fn profiler_config(&self) -> ProfilerConfig {
        ProfilerConfig::default()
            .with_log_capacity(self.log_capacity)
            .with_max_stack_depth(self.max_stack_depth)
            .with_alloc_sample_bytes(self.alloc_sample_bytes)
    }
}
