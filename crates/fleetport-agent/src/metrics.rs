//! Host resource sampling for heartbeats.

use fleetport_core::HeartbeatRequest;
use parking_lot::Mutex;
use sysinfo::System;

/// Samples CPU and memory utilisation.
///
/// CPU usage is computed between consecutive samples, so the first sample
/// after construction reads as zero.
pub struct MetricsSampler {
    system: Mutex<System>,
}

impl MetricsSampler {
    /// Create a sampler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Take a sample as a heartbeat body.
    pub fn sample(&self) -> HeartbeatRequest {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu = system.global_cpu_usage();
        let total = system.total_memory();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let mem = (total > 0).then(|| (system.used_memory() as f64 / total as f64 * 100.0) as f32);

        HeartbeatRequest {
            cpu: Some(cpu),
            mem,
        }
    }
}

impl Default for MetricsSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_a_percentage() {
        let sampler = MetricsSampler::new();
        sampler.sample();
        let sample = sampler.sample();

        let cpu = sample.cpu.unwrap();
        assert!((0.0..=100.0 * 1024.0).contains(&cpu));
        if let Some(mem) = sample.mem {
            assert!((0.0..=100.0).contains(&mem));
        }
    }
}
