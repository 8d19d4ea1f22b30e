//! The bound monitoring service: CPU sampler lifecycle plus on-demand memory.

use crate::config::{EstimatorKind, SamplerConfig};
use crate::error::Result;
use crate::metrics::data::{MemoryUsage, PerformanceReport};
use crate::metrics::memory::MemorySampler;
use crate::service::query::CpuUsageQuery;
use crate::service::scheduler::PeriodicScheduler;
use tracing::info;

/// Owns the CPU sampling loop for as long as the host keeps it alive.
///
/// Creating the service starts sampling; dropping it (or calling
/// [`MonitorService::destroy`]) stops it and joins the worker thread.
pub struct MonitorService {
    config: SamplerConfig,
    scheduler: PeriodicScheduler,
    memory: MemorySampler,
}

impl MonitorService {
    /// Build the configured estimator and start sampling.
    pub fn create(config: SamplerConfig) -> Result<Self> {
        let scheduler = PeriodicScheduler::from_config(&config)?;
        scheduler.start()?;
        info!(estimator = %config.estimator, cadence_ms = config.cadence_ms, "monitor service created");

        Ok(Self {
            config,
            scheduler,
            memory: MemorySampler::new(),
        })
    }

    /// Wrap an already built scheduler. It is started if it is not running.
    pub fn with_scheduler(config: SamplerConfig, scheduler: PeriodicScheduler) -> Result<Self> {
        if !scheduler.is_running() {
            scheduler.start()?;
        }
        Ok(Self {
            config,
            scheduler,
            memory: MemorySampler::new(),
        })
    }

    /// The last published CPU load.
    pub fn cpu_usage(&self) -> f64 {
        self.scheduler.query().current_cpu_usage()
    }

    /// Current system memory usage.
    pub fn memory_usage(&self) -> MemoryUsage {
        self.memory.sample()
    }

    /// CPU and memory figures in one record.
    pub fn performance_report(&self) -> PerformanceReport {
        PerformanceReport::new(
            self.cpu_usage(),
            &self.memory_usage(),
            self.scheduler.estimator_kind(),
        )
    }

    /// Which CPU strategy is running.
    pub fn estimator(&self) -> EstimatorKind {
        self.scheduler.estimator_kind()
    }

    /// The configuration the service was created with.
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// A handle that outlives borrows of the service.
    pub fn query(&self) -> CpuUsageQuery {
        self.scheduler.query()
    }

    /// The underlying scheduler, for restarts with another cadence.
    pub fn scheduler(&self) -> &PeriodicScheduler {
        &self.scheduler
    }

    /// Stop sampling and wait for the worker thread to exit.
    pub fn destroy(self) {
        let joined = self.scheduler.shutdown();
        info!(joined, "monitor service destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_bad_config() {
        assert!(MonitorService::create(SamplerConfig::new(1)).is_err());
    }

    #[test]
    fn test_report_from_fake_tree() {
        let dir = tempfile::tempdir().unwrap();
        let cpufreq = dir.path().join("cpu0/cpufreq");
        std::fs::create_dir_all(&cpufreq).unwrap();
        std::fs::write(cpufreq.join("scaling_cur_freq"), "500000").unwrap();
        std::fs::write(cpufreq.join("cpuinfo_min_freq"), "100000").unwrap();
        std::fs::write(cpufreq.join("cpuinfo_max_freq"), "2000000").unwrap();

        let config = SamplerConfig::new(100)
            .with_sysfs_cpu_root(dir.path())
            .with_core_count(1);
        let service = MonitorService::create(config).unwrap();
        let query = service.query();

        for _ in 0..200 {
            if query.current_cpu_usage() > 0.0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let report = service.performance_report();
        assert_eq!(report.cpu_usage, 25.0);
        assert_eq!(report.estimator, EstimatorKind::Frequency);
        assert!(report.memory_usage >= 0.0 && report.memory_usage <= 100.0);

        service.destroy();
        assert_eq!(query.current_cpu_usage(), 0.0);
        assert!(!query.is_running());
    }
}
