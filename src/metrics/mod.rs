//! CPU load estimators, memory sampling and the data they produce.
//!
//! Two CPU strategies live here behind [`CpuLoadEstimator`]: the
//! frequency-ratio scan of sysfs cpufreq nodes and the elapsed-ratio of
//! process CPU time over wall-clock time. They approximate the same
//! observable with different numbers and are kept separate.

pub mod data;
pub mod elapsed;
pub mod frequency;
pub mod memory;
pub mod traits;

use crate::config::{EstimatorKind, SamplerConfig};
use std::sync::Arc;

// Re-export commonly used items
pub use data::{CoreReading, FrequencyEstimate, MemoryUsage, UtilizationSample};
pub use elapsed::{ElapsedRatioSampler, FixedClock, ProcfsClock};
pub use frequency::{FrequencySampler, StaticFrequencySource, SysfsFrequencySource};
pub use memory::MemorySampler;
pub use traits::{CpuLoadEstimator, FrequencySource, ProcessClock};

/// Build the estimator selected by the configuration.
pub fn build_estimator(config: &SamplerConfig) -> Arc<dyn CpuLoadEstimator> {
    match config.estimator {
        EstimatorKind::Frequency => Arc::new(FrequencySampler::with_source(
            SysfsFrequencySource::with_root(&config.sysfs_cpu_root, config.core_count),
        )),
        EstimatorKind::ElapsedRatio => Arc::new(ElapsedRatioSampler::with_clock(
            ProcfsClock::with_root(&config.procfs_root, config.core_count),
        )),
    }
}
