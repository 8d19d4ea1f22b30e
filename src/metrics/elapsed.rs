//! Elapsed-ratio CPU load estimation.
//!
//! `load = cpu_time * 100 / wall_elapsed / cores`, clamped to `[0, 100]`.
//! `cpu_time` is what this process has consumed and `wall_elapsed` is time
//! since boot (`/proc/uptime`), so the figure is a long-run average rather
//! than an instantaneous reading.

use crate::config::EstimatorKind;
use crate::error::{PulseError, Result};
use crate::metrics::frequency::read_sysfs_file;
use crate::metrics::traits::{CpuLoadEstimator, ProcessClock};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default procfs mount point.
pub const PROCFS_ROOT: &str = "/proc";

/// Kernel clock tick rate used when `sysconf` has no answer.
const FALLBACK_TICKS_PER_SECOND: u64 = 100;

/// Clock ticks per second used by `/proc/<pid>/stat`.
fn ticks_per_second() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions and only reads a constant.
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if ticks > 0 {
            return ticks as u64;
        }
    }
    FALLBACK_TICKS_PER_SECOND
}

/// Tick counters pulled out of `/proc/self/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcStat {
    utime: u64,
    stime: u64,
}

impl ProcStat {
    /// Parse a stat line. The comm field may contain spaces and parentheses,
    /// so fields are counted from the last `)`.
    fn parse(content: &str, path: &Path) -> Result<Self> {
        let parse_err = |detail: &str| PulseError::parse_error(path.display().to_string(), detail);

        let comm_end = content.rfind(')').ok_or_else(|| parse_err("missing comm field"))?;
        let fields: Vec<&str> = content[comm_end + 1..].split_whitespace().collect();

        // fields[0] is the state (field 3 in proc(5) numbering)
        let field = |index: usize, name: &str| -> Result<u64> {
            fields
                .get(index)
                .ok_or_else(|| parse_err(&format!("missing {} field", name)))?
                .parse::<u64>()
                .map_err(|_| parse_err(&format!("non-numeric {} field", name)))
        };

        Ok(Self {
            utime: field(11, "utime")?,
            stime: field(12, "stime")?,
        })
    }
}

/// Process clock backed by procfs.
#[derive(Debug, Clone)]
pub struct ProcfsClock {
    root: PathBuf,
    ticks_per_second: u64,
    core_count: usize,
}

impl ProcfsClock {
    /// Read the real `/proc`.
    pub fn new() -> Self {
        Self::with_root(PROCFS_ROOT, None)
    }

    /// Read a different procfs mount, optionally pinning the core count.
    pub fn with_root(root: impl Into<PathBuf>, core_count: Option<usize>) -> Self {
        let core_count = core_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

        Self {
            root: root.into(),
            ticks_per_second: ticks_per_second(),
            core_count,
        }
    }

    /// Override the clock tick rate.
    pub fn with_ticks_per_second(mut self, ticks: u64) -> Self {
        self.ticks_per_second = ticks.max(1);
        self
    }

    fn read_stat(&self) -> Result<ProcStat> {
        let path = self.root.join("self").join("stat");
        let content = read_sysfs_file(&path)?;
        ProcStat::parse(&content, &path)
    }

    fn read_uptime(&self) -> Result<Duration> {
        let path = self.root.join("uptime");
        let content = read_sysfs_file(&path)?;
        let seconds = content
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s >= 0.0)
            .ok_or_else(|| {
                PulseError::parse_error(
                    path.display().to_string(),
                    format!("expected uptime seconds, got '{}'", content),
                )
            })?;
        Ok(Duration::from_secs_f64(seconds))
    }

    fn ticks_to_duration(&self, ticks: u64) -> Duration {
        Duration::from_millis(ticks.saturating_mul(1000) / self.ticks_per_second)
    }
}

impl Default for ProcfsClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessClock for ProcfsClock {
    fn cpu_time(&self) -> Result<Duration> {
        let stat = self.read_stat()?;
        Ok(self.ticks_to_duration(stat.utime + stat.stime))
    }

    fn elapsed(&self) -> Result<Duration> {
        self.read_uptime()
    }

    fn core_count(&self) -> usize {
        self.core_count
    }
}

/// Process clock returning fixed values.
#[derive(Debug, Clone)]
pub struct FixedClock {
    cpu_time: Option<Duration>,
    elapsed: Option<Duration>,
    core_count: usize,
}

impl FixedClock {
    /// A clock that always reports the given times.
    pub fn new(cpu_time: Duration, elapsed: Duration, core_count: usize) -> Self {
        Self {
            cpu_time: Some(cpu_time),
            elapsed: Some(elapsed),
            core_count,
        }
    }

    /// A clock whose counters are never readable.
    pub fn failing(core_count: usize) -> Self {
        Self {
            cpu_time: None,
            elapsed: None,
            core_count,
        }
    }
}

impl ProcessClock for FixedClock {
    fn cpu_time(&self) -> Result<Duration> {
        self.cpu_time
            .ok_or_else(|| PulseError::sampler_error("process CPU time unavailable"))
    }

    fn elapsed(&self) -> Result<Duration> {
        self.elapsed
            .ok_or_else(|| PulseError::sampler_error("process elapsed time unavailable"))
    }

    fn core_count(&self) -> usize {
        self.core_count
    }
}

/// Elapsed-ratio estimator.
pub struct ElapsedRatioSampler {
    clock: Box<dyn ProcessClock>,
}

impl ElapsedRatioSampler {
    /// Sample this process through the real `/proc`.
    pub fn new() -> Self {
        Self::with_clock(ProcfsClock::new())
    }

    /// Sample through an arbitrary process clock.
    pub fn with_clock(clock: impl ProcessClock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
        }
    }

    /// The load formula on raw millisecond figures.
    ///
    /// A non-positive or non-finite elapsed time means there is nothing to
    /// divide by and yields `0.0`; a core count of zero is treated as one.
    pub fn compute(cpu_time_ms: f64, elapsed_ms: f64, cores: usize) -> f64 {
        if !elapsed_ms.is_finite() || elapsed_ms <= 0.0 || !cpu_time_ms.is_finite() {
            return 0.0;
        }
        let raw = cpu_time_ms * 100.0 / elapsed_ms;
        (raw / cores.max(1) as f64).clamp(0.0, 100.0)
    }
}

impl Default for ElapsedRatioSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuLoadEstimator for ElapsedRatioSampler {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::ElapsedRatio
    }

    fn try_sample(&self) -> Result<f64> {
        let cpu_time = self.clock.cpu_time()?;
        let elapsed = self.clock.elapsed()?;
        Ok(Self::compute(
            cpu_time.as_secs_f64() * 1000.0,
            elapsed.as_secs_f64() * 1000.0,
            self.clock.core_count(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT_LINE: &str = "4242 (pulse (worker) x) S 1 4242 4242 0 -1 4194304 1500 0 0 0 \
        150 50 0 0 20 0 4 0 1000 123456789 2048 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0";

    #[test]
    fn test_compute_example() {
        let value = ElapsedRatioSampler::compute(500.0, 1000.0, 4);
        assert!((value - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_compute_guards() {
        assert_eq!(ElapsedRatioSampler::compute(500.0, 0.0, 4), 0.0);
        assert_eq!(ElapsedRatioSampler::compute(500.0, -5.0, 4), 0.0);
        assert_eq!(ElapsedRatioSampler::compute(5000.0, 1000.0, 1), 100.0);
        assert_eq!(ElapsedRatioSampler::compute(500.0, 1000.0, 0), 50.0);
        assert_eq!(ElapsedRatioSampler::compute(500.0, f64::NAN, 4), 0.0);
        assert_eq!(ElapsedRatioSampler::compute(500.0, f64::INFINITY, 4), 0.0);
        assert_eq!(ElapsedRatioSampler::compute(f64::NAN, 1000.0, 4), 0.0);
    }

    #[test]
    fn test_fixed_clock_sample() {
        let clock = FixedClock::new(Duration::from_millis(500), Duration::from_millis(1000), 4);
        let sampler = ElapsedRatioSampler::with_clock(clock);
        assert!((sampler.try_sample().unwrap() - 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_failing_clock_is_fail_soft() {
        let sampler = ElapsedRatioSampler::with_clock(FixedClock::failing(4));
        assert!(sampler.try_sample().is_err());
        assert_eq!(sampler.sample(), 0.0);
    }

    #[test]
    fn test_parse_stat_with_tricky_comm() {
        let stat = ProcStat::parse(STAT_LINE, Path::new("/proc/self/stat")).unwrap();
        assert_eq!(stat.utime, 150);
        assert_eq!(stat.stime, 50);
    }

    #[test]
    fn test_parse_stat_truncated() {
        let result = ProcStat::parse("1 (x) S 1 2 3", Path::new("stat"));
        assert!(matches!(result, Err(PulseError::Parse { .. })));
        assert!(ProcStat::parse("no comm here", Path::new("stat")).is_err());
    }

    #[test]
    fn test_procfs_clock_reads_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("self")).unwrap();
        std::fs::write(dir.path().join("self/stat"), STAT_LINE).unwrap();
        // 2s of CPU against 16s since boot; the process start time plays no part.
        std::fs::write(dir.path().join("uptime"), "16.00 50.00\n").unwrap();

        let clock = ProcfsClock::with_root(dir.path(), Some(2)).with_ticks_per_second(100);
        assert_eq!(clock.cpu_time().unwrap(), Duration::from_secs(2));
        assert_eq!(clock.elapsed().unwrap(), Duration::from_secs(16));

        let sampler = ElapsedRatioSampler::with_clock(clock);
        assert!((sampler.try_sample().unwrap() - 6.25).abs() < 1e-6);
    }

    #[test]
    fn test_procfs_clock_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = ElapsedRatioSampler::with_clock(ProcfsClock::with_root(dir.path(), Some(1)));
        assert!(sampler.try_sample().unwrap_err().is_unavailable());
        assert_eq!(sampler.sample(), 0.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_real_procfs() {
        let value = ElapsedRatioSampler::new().sample();
        assert!((0.0..=100.0).contains(&value));
    }
}
