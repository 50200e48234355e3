//! Profiler facade owning both samplers

use log::info;
use std::sync::Arc;

use crate::config::{LogSettings, ProfilerConfig};
use crate::domain::{ConfigError, SamplerKind};
use crate::host::StackSource;
use crate::sampler::{AllocationGate, CpuSampler, MemorySampler, Snapshot};
use crate::timer::Alarm;

/// A CPU and a memory sampler over one host stack, sharing log settings.
pub struct Profiler {
    settings: Arc<LogSettings>,
    cpu: CpuSampler,
    memory: MemorySampler,
}

impl Profiler {
    /// Build both samplers from a validated configuration.
    ///
    /// # Errors
    /// Returns an error if `config` fails [`ProfilerConfig::validate`].
    pub fn new(
        config: &ProfilerConfig,
        source: Arc<dyn StackSource>,
        alarm: Box<dyn Alarm>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Profiler configured: log_capacity={}, max_stack_depth={}, alloc_sample_bytes={}",
            config.log_capacity, config.max_stack_depth, config.alloc_sample_bytes
        );

        let settings = Arc::new(LogSettings::new(config));
        let cpu = CpuSampler::new(settings.clone(), source.clone(), alarm);
        let memory = MemorySampler::new(
            settings.clone(),
            source,
            AllocationGate::new(config.alloc_sample_bytes),
        );
        Ok(Self { settings, cpu, memory })
    }

    #[must_use]
    pub fn cpu(&self) -> &CpuSampler {
        &self.cpu
    }

    #[must_use]
    pub fn memory(&self) -> &MemorySampler {
        &self.memory
    }

    #[must_use]
    pub fn settings(&self) -> &LogSettings {
        &self.settings
    }

    /// Export the log of the given sampler kind.
    pub fn export(&self, kind: SamplerKind) -> Snapshot {
        match kind {
            SamplerKind::Cpu => self.cpu.export(),
            SamplerKind::Memory => self.memory.export(),
        }
    }

    /// Change the capacity of logs created from now on.
    ///
    /// # Errors
    /// Returns an error if the capacity is zero or too large.
    pub fn set_log_capacity(&self, capacity: usize) -> Result<(), ConfigError> {
        self.settings.set_capacity(capacity)?;
        info!("Log capacity set to {capacity}, applies to the next log");
        Ok(())
    }

    /// Change the stack depth of logs created from now on.
    ///
    /// # Errors
    /// Returns an error if the depth is zero.
    pub fn set_max_stack_depth(&self, depth: usize) -> Result<(), ConfigError> {
        self.settings.set_depth(depth)?;
        info!("Max stack depth set to {depth}, applies to the next log");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FrameId;
    use crate::histogram::BacktraceLog;
    use crate::host::ShadowStack;
    use crate::timer::ManualAlarm;

    fn profiler(stack: &Arc<ShadowStack>, config: &ProfilerConfig) -> Profiler {
        Profiler::new(config, stack.clone(), Box::new(ManualAlarm::new())).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let stack = Arc::new(ShadowStack::new(1));
        let config = ProfilerConfig::default().with_log_capacity(0);
        let result = Profiler::new(&config, stack, Box::new(ManualAlarm::new()));
        assert!(matches!(result, Err(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn test_samplers_are_independent() {
        let stack = Arc::new(ShadowStack::new(4));
        let profiler = profiler(&stack, &ProfilerConfig::default().with_max_stack_depth(2));
        profiler.cpu().start(10).unwrap();
        profiler.memory().start().unwrap();

        let _main = stack.push(FrameId(1));
        profiler.cpu().tick();
        profiler.memory().probe(4096);

        let cpu = profiler.export(SamplerKind::Cpu);
        let memory = profiler.export(SamplerKind::Memory);
        assert_eq!(cpu.weight_of(&[FrameId(1)]), Some(10));
        assert_eq!(memory.weight_of(&[FrameId(1)]), Some(4096));
        assert_eq!(cpu.kind(), SamplerKind::Cpu);
        assert_eq!(memory.kind(), SamplerKind::Memory);
    }

    #[test]
    fn test_depth_change_applies_to_next_log() {
        let stack = Arc::new(ShadowStack::new(8));
        let profiler = profiler(&stack, &ProfilerConfig::default().with_max_stack_depth(2));
        profiler.memory().start().unwrap();

        profiler.set_max_stack_depth(5).unwrap();
        profiler.set_log_capacity(32).unwrap();
        let _main = stack.push(FrameId(1));
        profiler.memory().probe(1);

        // the live log keeps its dimensions
        let first = profiler.export(SamplerKind::Memory);
        assert_eq!(first.depth(), 2);

        // the rotated-in log picks up the new ones
        let second = profiler.export(SamplerKind::Memory);
        assert_eq!(second.depth(), 5);
        assert_eq!(second.log().map(BacktraceLog::capacity), Some(32));
    }

    #[test]
    fn test_invalid_setting_is_rejected() {
        let stack = Arc::new(ShadowStack::new(1));
        let profiler = profiler(&stack, &ProfilerConfig::default());
        assert!(matches!(profiler.set_max_stack_depth(0), Err(ConfigError::ZeroDepth)));
        assert_eq!(profiler.settings().depth(), 16);
    }

    #[test]
    fn test_alloc_sample_bytes_configures_gate() {
        let stack = Arc::new(ShadowStack::new(2));
        let config = ProfilerConfig::default().with_alloc_sample_bytes(1000);
        let profiler = profiler(&stack, &config);
        profiler.memory().start().unwrap();
        let _main = stack.push(FrameId(9));

        profiler.memory().note_allocation(600);
        assert_eq!(profiler.memory().live_len(), 0);
        profiler.memory().note_allocation(600);
        assert_eq!(profiler.memory().live_len(), 1);
        assert_eq!(profiler.export(SamplerKind::Memory).weight_of(&[FrameId(9)]), Some(1200));
    }
}
