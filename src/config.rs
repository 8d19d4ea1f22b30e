//! Sampler configuration.

use crate::error::{PulseError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which CPU load heuristic the scheduler runs.
///
/// The two strategies measure different things and are never blended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EstimatorKind {
    /// Average of per-core `current / max` scaling frequency.
    Frequency,
    /// Process CPU time over time since boot, per core.
    ElapsedRatio,
}

impl Default for EstimatorKind {
    fn default() -> Self {
        Self::Frequency
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frequency => write!(f, "frequency"),
            Self::ElapsedRatio => write!(f, "elapsed-ratio"),
        }
    }
}

impl FromStr for EstimatorKind {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "frequency" | "freq" => Ok(Self::Frequency),
            "elapsed-ratio" | "elapsed" => Ok(Self::ElapsedRatio),
            other => Err(PulseError::config_error(format!(
                "unknown estimator '{}', expected 'frequency' or 'elapsed-ratio'",
                other
            ))),
        }
    }
}

/// Configuration for the background CPU sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Sampling cadence in milliseconds
    pub cadence_ms: u64,
    /// Estimation strategy
    pub estimator: EstimatorKind,
    /// Directory holding the per-core `cpuN/cpufreq` nodes
    pub sysfs_cpu_root: PathBuf,
    /// Mount point of procfs
    pub procfs_root: PathBuf,
    /// Number of cores to scan; detected when unset
    pub core_count: Option<usize>,
}

impl SamplerConfig {
    /// Smallest cadence accepted by [`SamplerConfig::validate`].
    pub const MIN_CADENCE_MS: u64 = 100;

    /// Create a configuration with the given cadence and defaults elsewhere.
    pub fn new(cadence_ms: u64) -> Self {
        Self {
            cadence_ms,
            ..Default::default()
        }
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            PulseError::config_error(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Set the sampling cadence.
    pub fn with_cadence_ms(mut self, cadence_ms: u64) -> Self {
        self.cadence_ms = cadence_ms;
        self
    }

    /// Set the estimation strategy.
    pub fn with_estimator(mut self, estimator: EstimatorKind) -> Self {
        self.estimator = estimator;
        self
    }

    /// Point the frequency source at a different sysfs cpu directory.
    pub fn with_sysfs_cpu_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_cpu_root = root.into();
        self
    }

    /// Point the process clock at a different procfs mount.
    pub fn with_procfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.procfs_root = root.into();
        self
    }

    /// Pin the number of cores instead of detecting it.
    pub fn with_core_count(mut self, cores: usize) -> Self {
        self.core_count = Some(cores);
        self
    }

    /// The cadence as a `Duration`.
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    /// Check the configuration for values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cadence_ms < Self::MIN_CADENCE_MS {
            return Err(PulseError::config_error(format!(
                "cadence must be at least {}ms, got {}ms",
                Self::MIN_CADENCE_MS,
                self.cadence_ms
            )));
        }
        if self.core_count == Some(0) {
            return Err(PulseError::config_error("core count override must be non-zero"));
        }
        Ok(())
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            cadence_ms: crate::DEFAULT_CADENCE_MS,
            estimator: EstimatorKind::default(),
            sysfs_cpu_root: PathBuf::from(crate::metrics::frequency::SYSFS_CPU_ROOT),
            procfs_root: PathBuf::from(crate::metrics::elapsed::PROCFS_ROOT),
            core_count: None,
        }
    }
}
