//! # sprof - Sampling CPU and Memory Profiler Core
//!
//! sprof attributes CPU time and allocated bytes to the call stacks of a host
//! interpreter. It keeps a bounded, in-memory table of distinct backtraces per
//! sampler and never grows it at sampling time: when the table is full, the
//! lighter half of its entries is evicted to make room.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Host Interpreter                            │
//! │          (pushes frames, allocates, collects garbage)           │
//! └──────────┬───────────────────────────────────┬──────────────────┘
//!            │ StackSource                       │ probe(size)
//!            ▼                                   ▼
//! ┌──────────────────────┐            ┌──────────────────────┐
//! │     CpuSampler       │◀── tick ── │  Alarm (SIGPROF /    │
//! │  (GC accumulator)    │            │   manual)            │
//! └──────────┬───────────┘            └──────────────────────┘
//!            │                        ┌──────────────────────┐
//!            │                        │    MemorySampler     │
//!            │                        │  (AllocationGate)    │
//!            │                        └──────────┬───────────┘
//!            ▼ try_lock                          ▼ try_lock
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          Recorder ──▶ BacktraceLog (arena + hash index)         │
//! │                          │ full?                                │
//! │                          ▼                                      │
//! │               evict weights <= approximate median               │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ export (rotate under lock)
//!                         ▼
//! ┌──────────────┐   ┌──────────────┐
//! │   Snapshot   │──▶│    Export    │  JSON document, hotspot summary
//! └──────────────┘   └──────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`histogram`]: the bounded backtrace log and its eviction policy
//! - [`recorder`]: the allocation-free capture-and-accumulate step
//! - [`sampler`]: CPU and memory samplers, their lifecycle and export rotation
//! - [`timer`]: periodic alarms driving the CPU sampler
//! - [`host`]: what the profiler needs from the host, plus a shadow stack
//! - [`profiler`]: facade owning both samplers and their shared settings
//! - [`config`]: user configuration and live log settings
//! - [`export`]: JSON profile documents and hotspot summaries
//! - [`cli`]: command-line arguments of the `sprof` binary
//! - [`workload`]: toy interpreter profiled by the `sprof` binary
//! - [`domain`]: core types and error enums
//!
//! ## Signal Safety
//!
//! A CPU tick may interrupt any code, including an export or the log itself.
//! The tick path never allocates and never waits: it reads atomics, captures
//! into a preallocated scratch row and only ever `try_lock`s the log. A
//! sample that finds the log busy is dropped and counted.
//!
//! ## Typical Usage
//!
//! ```bash
//! # CPU profile of the demo workload until Ctrl+C
//! ./sprof
//!
//! # Both profilers for ten seconds, saved for offline analysis
//! ./sprof --mode both --duration 10 --export profile.json
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod export;
pub mod histogram;
pub mod host;
pub mod profiler;
pub mod recorder;
pub mod sampler;
pub mod timer;
pub mod workload;

pub use profiler::Profiler;
