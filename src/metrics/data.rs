//! Data structures for sampled CPU and memory telemetry.

use crate::config::EstimatorKind;
use serde::{Deserialize, Serialize};

/// Current Unix time in milliseconds.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Frequency readings for one core. `None` marks an unavailable reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreReading {
    /// Core index (0-based)
    pub core_index: usize,
    /// Current scaling frequency in MHz
    pub current_frequency_mhz: Option<u64>,
    /// Minimum hardware frequency in MHz
    pub min_frequency_mhz: Option<u64>,
    /// Maximum hardware frequency in MHz
    pub max_frequency_mhz: Option<u64>,
}

impl CoreReading {
    /// A reading for a core that exposed nothing.
    pub fn unavailable(core_index: usize) -> Self {
        Self {
            core_index,
            current_frequency_mhz: None,
            min_frequency_mhz: None,
            max_frequency_mhz: None,
        }
    }

    /// `current / max`, or `None` unless both are present and max is non-zero.
    ///
    /// Not clamped: boost clocks can report above the nominal maximum.
    pub fn utilization(&self) -> Option<f64> {
        match (self.current_frequency_mhz, self.max_frequency_mhz) {
            (Some(current), Some(max)) if max > 0 => Some(current as f64 / max as f64),
            _ => None,
        }
    }
}

/// The result of one full frequency scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyEstimate {
    /// Estimated load, 0.0 to 100.0
    pub percent: f64,
    /// Cores that contributed to the average
    pub valid_cores: usize,
    /// Cores that were scanned
    pub total_cores: usize,
    /// Raw per-core readings
    pub readings: Vec<CoreReading>,
}

impl FrequencyEstimate {
    /// Whether at least one core produced a usable reading.
    pub fn has_data(&self) -> bool {
        self.valid_cores > 0
    }
}

/// One published CPU utilization value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    /// CPU load percentage (0.0 to 100.0)
    pub value: f64,
    /// When the sample was published (Unix timestamp in milliseconds)
    pub timestamp: u64,
    /// Strategy that produced the value
    pub estimator: EstimatorKind,
}

impl UtilizationSample {
    /// Create a sample stamped with the current time.
    pub fn new(value: f64, estimator: EstimatorKind) -> Self {
        Self {
            value,
            timestamp: unix_millis(),
            estimator,
        }
    }
}

/// Externally visible scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerState {
    /// Whether a tick loop is active
    pub running: bool,
    /// Last published value, 0.0 when stopped
    pub last_value: f64,
    /// Sampling cadence in milliseconds
    pub cadence_ms: u64,
}

/// Diagnostics for the tick loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplerHealth {
    /// Whether a tick loop is active
    pub running: bool,
    /// Ticks that published a value
    pub ticks: u64,
    /// Ticks whose estimator failed or panicked
    pub failures: u64,
    /// Failures since the last successful tick
    pub consecutive_failures: u64,
    /// Message of the most recent failure
    pub last_error: Option<String>,
    /// Most recently published sample
    pub last_sample: Option<UtilizationSample>,
}

impl SamplerHealth {
    /// A loop is healthy when it is running and its last tick succeeded.
    pub fn is_healthy(&self) -> bool {
        self.running && self.consecutive_failures == 0
    }
}

/// System memory usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Total system memory in bytes
    pub total_bytes: u64,
    /// Available memory in bytes
    pub available_bytes: u64,
    /// Used memory in bytes (total minus available)
    pub used_bytes: u64,
    /// Memory usage percentage (0.0 to 100.0)
    pub usage_percent: f64,
}

impl MemoryUsage {
    /// Build from total and available byte counts.
    pub fn from_totals(total_bytes: u64, available_bytes: u64) -> Self {
        let used_bytes = total_bytes.saturating_sub(available_bytes);
        let usage_percent = if total_bytes > 0 {
            used_bytes as f64 * 100.0 / total_bytes as f64
        } else {
            0.0
        };

        Self {
            total_bytes,
            available_bytes,
            used_bytes,
            usage_percent,
        }
    }

    /// Used memory in whole MiB.
    pub fn used_mb(&self) -> u64 {
        self.used_bytes / (1024 * 1024)
    }

    /// Total memory in whole MiB.
    pub fn total_mb(&self) -> u64 {
        self.total_bytes / (1024 * 1024)
    }
}

/// Combined CPU and memory figures handed to the host UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    /// When the report was assembled (Unix timestamp in milliseconds)
    pub timestamp: u64,
    /// Last published CPU load percentage
    pub cpu_usage: f64,
    /// System memory usage percentage
    pub memory_usage: f64,
    #[serde(rename = "memoryUsedMB")]
    pub memory_used_mb: u64,
    #[serde(rename = "memoryTotalMB")]
    pub memory_total_mb: u64,
    /// Strategy behind `cpu_usage`
    pub estimator: EstimatorKind,
}

impl PerformanceReport {
    /// Assemble a report stamped with the current time.
    pub fn new(cpu_usage: f64, memory: &MemoryUsage, estimator: EstimatorKind) -> Self {
        Self {
            timestamp: unix_millis(),
            cpu_usage,
            memory_usage: memory.usage_percent,
            memory_used_mb: memory.used_mb(),
            memory_total_mb: memory.total_mb(),
            estimator,
        }
    }
}
