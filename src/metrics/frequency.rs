//! Frequency-ratio CPU load estimation.
//!
//! Reads per-core scaling state from sysfs:
//! - `cpuN/cpufreq/scaling_cur_freq`: current frequency, kHz.
//! - `cpuN/cpufreq/cpuinfo_min_freq` and `cpuinfo_max_freq`: hardware limits, kHz.
//! - `present`: the core index range list.
//!
//! A core's utilization is `current / max`; the estimate is the mean over
//! cores that produced both values, as a percentage capped at 100. Devices
//! that hide cpufreq (emulators, some vendor kernels) simply contribute no
//! cores and the estimate falls back to `0.0`.

use crate::config::EstimatorKind;
use crate::error::{PulseError, Result};
use crate::metrics::data::{CoreReading, FrequencyEstimate};
use crate::metrics::traits::{CpuLoadEstimator, FrequencySource};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default sysfs directory for CPU nodes.
pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Frequency source backed by the sysfs cpufreq nodes.
#[derive(Debug, Clone)]
pub struct SysfsFrequencySource {
    root: PathBuf,
    core_count: usize,
}

impl SysfsFrequencySource {
    /// Scan the real `/sys/devices/system/cpu`.
    pub fn new() -> Self {
        Self::with_root(SYSFS_CPU_ROOT, None)
    }

    /// Scan a different cpu directory, optionally pinning the core count.
    pub fn with_root(root: impl Into<PathBuf>, core_count: Option<usize>) -> Self {
        let root = root.into();
        let core_count = core_count.unwrap_or_else(|| detect_core_count(&root));
        Self { root, core_count }
    }

    /// The directory being scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cpufreq_path(&self, core_index: usize, node: &str) -> PathBuf {
        self.root
            .join(format!("cpu{}", core_index))
            .join("cpufreq")
            .join(node)
    }

    fn read_current(&self, core_index: usize) -> Option<u64> {
        let path = self.cpufreq_path(core_index, "scaling_cur_freq");
        match read_frequency_mhz(&path) {
            Ok(mhz) => Some(mhz),
            Err(err) => {
                debug!(core = core_index, path = %path.display(), error = %err, "current frequency unavailable");
                None
            }
        }
    }

    /// Min and max are read together; losing either loses both.
    fn read_limits(&self, core_index: usize) -> Option<(u64, u64)> {
        let min_path = self.cpufreq_path(core_index, "cpuinfo_min_freq");
        let max_path = self.cpufreq_path(core_index, "cpuinfo_max_freq");
        let limits = read_frequency_mhz(&min_path)
            .and_then(|min| read_frequency_mhz(&max_path).map(|max| (min, max)));

        match limits {
            Ok(limits) => Some(limits),
            Err(err) => {
                debug!(core = core_index, error = %err, "frequency limits unavailable");
                None
            }
        }
    }
}

impl Default for SysfsFrequencySource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencySource for SysfsFrequencySource {
    fn core_count(&self) -> usize {
        self.core_count
    }

    fn read_core(&self, core_index: usize) -> CoreReading {
        let current = self.read_current(core_index);
        let limits = self.read_limits(core_index);

        CoreReading {
            core_index,
            current_frequency_mhz: current,
            min_frequency_mhz: limits.map(|(min, _)| min),
            max_frequency_mhz: limits.map(|(_, max)| max),
        }
    }
}

/// In-memory frequency source with fixed readings.
///
/// Cores missing from the table read as unavailable.
#[derive(Debug, Clone, Default)]
pub struct StaticFrequencySource {
    core_count: usize,
    readings: HashMap<usize, CoreReading>,
}

impl StaticFrequencySource {
    /// A source reporting `core_count` cores, all unavailable.
    pub fn new(core_count: usize) -> Self {
        Self {
            core_count,
            readings: HashMap::new(),
        }
    }

    /// Set the current and max frequency (MHz) for one core.
    pub fn with_core(mut self, core_index: usize, current_mhz: u64, max_mhz: u64) -> Self {
        self.readings.insert(
            core_index,
            CoreReading {
                core_index,
                current_frequency_mhz: Some(current_mhz),
                min_frequency_mhz: Some(0),
                max_frequency_mhz: Some(max_mhz),
            },
        );
        self
    }

    /// Set an arbitrary reading for one core.
    pub fn with_reading(mut self, reading: CoreReading) -> Self {
        self.readings.insert(reading.core_index, reading);
        self
    }
}

impl FrequencySource for StaticFrequencySource {
    fn core_count(&self) -> usize {
        self.core_count
    }

    fn read_core(&self, core_index: usize) -> CoreReading {
        self.readings
            .get(&core_index)
            .copied()
            .unwrap_or_else(|| CoreReading::unavailable(core_index))
    }
}

/// Frequency-ratio estimator.
///
/// Stateless: every call is a full fresh scan of all cores.
pub struct FrequencySampler {
    source: Box<dyn FrequencySource>,
}

impl FrequencySampler {
    /// Sample the real sysfs tree.
    pub fn new() -> Self {
        Self::with_source(SysfsFrequencySource::new())
    }

    /// Sample an arbitrary frequency source.
    pub fn with_source(source: impl FrequencySource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    /// Scan every core and average the ones with valid readings.
    pub fn estimate(&self) -> FrequencyEstimate {
        let total_cores = self.source.core_count();
        let readings: Vec<CoreReading> = (0..total_cores)
            .map(|core| self.source.read_core(core))
            .collect();

        let utilizations: Vec<f64> = readings.iter().filter_map(CoreReading::utilization).collect();
        let valid_cores = utilizations.len();

        let average = if valid_cores > 0 {
            utilizations.iter().sum::<f64>() / valid_cores as f64
        } else {
            warn!(total_cores, "no core exposed a usable frequency reading");
            0.0
        };

        FrequencyEstimate {
            percent: (average * 100.0).min(100.0),
            valid_cores,
            total_cores,
            readings,
        }
    }
}

impl Default for FrequencySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuLoadEstimator for FrequencySampler {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Frequency
    }

    fn try_sample(&self) -> Result<f64> {
        Ok(self.estimate().percent)
    }
}

/// Reads a sysfs file and returns its trimmed content.
pub(crate) fn read_sysfs_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(PulseError::unavailable(path.display().to_string()));
    }
    Ok(std::fs::read_to_string(path)?.trim().to_string())
}

/// Reads a cpufreq value (reported in kHz) and returns MHz.
fn read_frequency_mhz(path: &Path) -> Result<u64> {
    let content = read_sysfs_file(path)?;
    let khz = content.parse::<u64>().map_err(|_| {
        PulseError::parse_error(
            path.display().to_string(),
            format!("expected integer kHz value, got '{}'", content),
        )
    })?;
    Ok(khz / 1000)
}

/// Counts cores from `{root}/present`, falling back to the scheduler's view.
fn detect_core_count(root: &Path) -> usize {
    if let Ok(content) = read_sysfs_file(&root.join("present")) {
        if let Some(last) = parse_cpu_range_max(&content) {
            return last + 1;
        }
    }

    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Highest index in a range list like `"0-3"` or `"0,2-5"`.
///
/// The scan runs over `0..=max` so holes in the list read as unavailable
/// cores instead of shifting the indices.
fn parse_cpu_range_max(s: &str) -> Option<usize> {
    let mut max = None;
    for part in s.split(',') {
        let part = part.trim();
        let last = match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start.trim().parse().ok()?;
                let end: usize = end.trim().parse().ok()?;
                if end < start {
                    return None;
                }
                end
            }
            None => part.parse().ok()?,
        };
        max = Some(max.map_or(last, |m: usize| m.max(last)));
    }
    max
}
