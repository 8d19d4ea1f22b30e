//! Traits for CPU load estimation and the counters behind it.

use crate::config::EstimatorKind;
use crate::error::Result;
use crate::metrics::data::CoreReading;
use std::time::Duration;

/// A heuristic that turns OS counters into a CPU load percentage.
///
/// Implementations are called from the scheduler's worker thread, one call
/// per tick, and must not keep the caller waiting on anything but the reads
/// themselves.
pub trait CpuLoadEstimator: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> EstimatorKind;

    /// Take one measurement.
    ///
    /// An error marks the tick as failed and the scheduler publishes `0.0`
    /// in its place, the same figure [`CpuLoadEstimator::sample`] reports.
    fn try_sample(&self) -> Result<f64>;

    /// Take one measurement, degrading any failure to `0.0`.
    fn sample(&self) -> f64 {
        match self.try_sample() {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(estimator = %self.kind(), error = %err, "CPU sample failed, reporting 0.0");
                0.0
            }
        }
    }
}

/// Where per-core scaling frequencies come from.
pub trait FrequencySource: Send + Sync {
    /// Number of cores to scan, indexed `0..core_count()`.
    fn core_count(&self) -> usize;

    /// Read one core. Failures show up as `None` fields, never as errors.
    fn read_core(&self, core_index: usize) -> CoreReading;
}

/// Process-level CPU time and the wall clock it is divided by.
pub trait ProcessClock: Send + Sync {
    /// CPU time consumed by this process (user + system).
    fn cpu_time(&self) -> Result<Duration>;

    /// Wall-clock time the CPU time is measured against (time since boot).
    fn elapsed(&self) -> Result<Duration>;

    /// Number of cores the CPU time is spread across.
    fn core_count(&self) -> usize;
}
