//! # System Pulse - CPU and Memory Telemetry Sampler
//!
//! A small crate that estimates device CPU load from coarse OS counters on a
//! dedicated background thread and hands the latest value to any number of
//! readers without blocking them. Built for mobile and embedded Linux hosts
//! where per-process accounting is unavailable and the UI just polls.
//!
//! ## Features
//!
//! - **Two estimators**: per-core scaling frequency ratio, or process CPU
//!   time over time since boot
//! - **Fixed-rate sampling**: one worker thread, idempotent start/stop
//! - **Lock-free queries**: the last value is an atomic read
//! - **Fail-soft**: unreadable counters degrade to `0.0`, never to errors
//! - **Library + Binary**: embed the service or run the `system_pulse` CLI
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use system_pulse::{MonitorService, SamplerConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = MonitorService::create(SamplerConfig::default())?;
//!     let query = service.query();
//!
//!     std::thread::sleep(std::time::Duration::from_secs(2));
//!     println!("CPU: {:.1}%", query.current_cpu_usage());
//!
//!     service.destroy();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod service;

// Re-export public API
pub use config::{EstimatorKind, SamplerConfig};
pub use error::{PulseError, Result};
pub use metrics::{
    build_estimator,
    data::{
        CoreReading, FrequencyEstimate, MemoryUsage, PerformanceReport, SamplerHealth,
        SamplerState, UtilizationSample,
    },
    CpuLoadEstimator, ElapsedRatioSampler, FrequencySampler, FrequencySource, MemorySampler,
    ProcessClock,
};
pub use service::{CpuUsageQuery, MonitorService, PeriodicScheduler, SampleSlot};

/// The default sampling cadence in milliseconds
pub const DEFAULT_CADENCE_MS: u64 = 1000;
