//! Allocation-free backtrace recording
//!
//! The one path through which both samplers update a log. It captures the
//! live stack into the log's scratch row, pads it to the log depth and
//! accumulates the weight, without allocating and without consulting the
//! host beyond [`StackSource::capture`].

use crate::domain::FrameId;
use crate::histogram::BacktraceLog;
use crate::host::StackSource;

/// Record the current call stack of `source` into `log` with `weight`.
pub fn record_backtrace(log: &mut BacktraceLog, source: &dyn StackSource, weight: u64) {
    let mut scratch = log.take_scratch();

    let captured = source.capture(&mut scratch).min(scratch.len());
    scratch[captured..].fill(FrameId::NULL);

    let slot = log.lookup_or_create_slot(&scratch);
    log.increment(slot, weight);

    log.restore_scratch(scratch);
}
